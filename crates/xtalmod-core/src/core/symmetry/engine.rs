use super::operator::{OperatorParseError, SymmetryOperator};
use nalgebra::DVector;
use thiserror::Error;
use tracing::debug;

/// Fractional tolerance below which two symmetry images are the same site.
pub const IMAGE_TOLERANCE: f64 = 1e-4;

/// Errors raised by the symmetry engine.
#[derive(Debug, Error, PartialEq)]
pub enum SymmetryError {
    /// Operator text that the Jones-faithful grammar rejected.
    #[error(transparent)]
    Parse(#[from] OperatorParseError),
    /// A lattice centering letter with no known translation set.
    #[error("unknown lattice centering '{0}'")]
    UnknownCentering(char),
    /// A coordinate of the wrong dimensionality was supplied.
    #[error("coordinate has {found} components, engine expects {expected}")]
    DimensionMismatch {
        /// Components supplied.
        found: usize,
        /// Components required (3 + modulation dimension).
        expected: usize,
    },
}

/// The symmetry-operator set for one structure.
///
/// Holds the space-group operators (always including the identity) and the
/// lattice-centering translations, expands an asymmetric-unit position into
/// its set of equivalent positions, and reports site multiplicities.
/// Centerings are stored as extra fractional translations applied after
/// every operator, never as a special cell type.
#[derive(Debug, Clone)]
pub struct SymmetryOperatorEngine {
    mod_dim: usize,
    operators: Vec<SymmetryOperator>,
    centerings: Vec<DVector<f64>>,
}

impl SymmetryOperatorEngine {
    /// Creates an engine for `3 + mod_dim` dimensions containing only the
    /// identity operator and the trivial centering.
    pub fn new(mod_dim: usize) -> Self {
        Self {
            mod_dim,
            operators: vec![SymmetryOperator::identity(mod_dim)],
            centerings: vec![DVector::zeros(3 + mod_dim)],
        }
    }

    /// The modulation dimension d.
    pub fn mod_dim(&self) -> usize {
        self.mod_dim
    }

    /// The coordinate dimension, 3 + d.
    pub fn dimension(&self) -> usize {
        3 + self.mod_dim
    }

    /// The stored operators in insertion order, identity first.
    pub fn operators(&self) -> &[SymmetryOperator] {
        &self.operators
    }

    /// Parses and appends a Jones-faithful operator string.
    ///
    /// An operator already present (within [`IMAGE_TOLERANCE`], translations
    /// compared modulo 1) is skipped, so re-reading the identity is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`SymmetryError::Parse`] for malformed text.
    pub fn add_operator(&mut self, text: &str) -> Result<(), SymmetryError> {
        let op = SymmetryOperator::parse(text, self.mod_dim)?;
        if !self
            .operators
            .iter()
            .any(|existing| existing.approx_eq(&op, IMAGE_TOLERANCE))
        {
            debug!(operator = %op, "adding symmetry operator");
            self.operators.push(op);
        }
        Ok(())
    }

    /// Appends a translation-only centering operator.
    ///
    /// # Errors
    ///
    /// Returns [`SymmetryError::DimensionMismatch`] if the translation does
    /// not have 3 + d components.
    pub fn add_centering(&mut self, translation: DVector<f64>) -> Result<(), SymmetryError> {
        if translation.len() != self.dimension() {
            return Err(SymmetryError::DimensionMismatch {
                found: translation.len(),
                expected: self.dimension(),
            });
        }
        let as_op = SymmetryOperator::from_translation(translation.clone());
        let trivial = SymmetryOperator::identity(self.mod_dim);
        if !as_op.approx_eq(&trivial, IMAGE_TOLERANCE)
            && !self.centerings.iter().any(|c| {
                SymmetryOperator::from_translation(c.clone()).approx_eq(&as_op, IMAGE_TOLERANCE)
            })
        {
            self.centerings.push(translation);
        }
        Ok(())
    }

    /// Appends the centering translations for a conventional lattice letter
    /// (P, A, B, C, I, F, or R), zero-extended into any internal dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`SymmetryError::UnknownCentering`] for an unrecognized letter.
    pub fn add_lattice_centering(&mut self, letter: char) -> Result<(), SymmetryError> {
        let half = 0.5;
        let third = 1.0 / 3.0;
        let sets: &[[f64; 3]] = match letter.to_ascii_uppercase() {
            'P' => &[],
            'A' => &[[0.0, half, half]],
            'B' => &[[half, 0.0, half]],
            'C' => &[[half, half, 0.0]],
            'I' => &[[half, half, half]],
            'F' => &[[0.0, half, half], [half, 0.0, half], [half, half, 0.0]],
            'R' => &[
                [2.0 * third, third, third],
                [third, 2.0 * third, 2.0 * third],
            ],
            other => return Err(SymmetryError::UnknownCentering(other)),
        };
        for xyz in sets {
            let mut t = DVector::zeros(self.dimension());
            t[0] = xyz[0];
            t[1] = xyz[1];
            t[2] = xyz[2];
            self.add_centering(t)?;
        }
        Ok(())
    }

    /// Expands a fractional position into its symmetry-equivalent images.
    ///
    /// Every operator is applied in insertion order, then every centering
    /// translation. With `reduce` the external components are brought into
    /// [0, 1); without it the raw images are returned. Duplicates within
    /// [`IMAGE_TOLERANCE`] are removed keeping the first-generated image, so
    /// downstream references to image order are reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`SymmetryError::DimensionMismatch`] for a coordinate of the
    /// wrong length.
    pub fn expand(
        &self,
        coords: &DVector<f64>,
        reduce: bool,
    ) -> Result<Vec<DVector<f64>>, SymmetryError> {
        Ok(self
            .expand_with_operators(coords, reduce)?
            .into_iter()
            .map(|(_, image)| image)
            .collect())
    }

    /// Like [`Self::expand`], but pairs each image with the index into
    /// [`Self::operators`] of the operator that first generated it.
    ///
    /// Centering translations never change the rotation part, so the paired
    /// operator is sufficient to transform direction-valued quantities
    /// (modulation displacements, ADP tensors) along with the image.
    ///
    /// # Errors
    ///
    /// Returns [`SymmetryError::DimensionMismatch`] for a coordinate of the
    /// wrong length.
    pub fn expand_with_operators(
        &self,
        coords: &DVector<f64>,
        reduce: bool,
    ) -> Result<Vec<(usize, DVector<f64>)>, SymmetryError> {
        if coords.len() != self.dimension() {
            return Err(SymmetryError::DimensionMismatch {
                found: coords.len(),
                expected: self.dimension(),
            });
        }
        let mut images: Vec<(usize, DVector<f64>)> = Vec::new();
        for (index, op) in self.operators.iter().enumerate() {
            let base = op.apply(coords);
            for centering in &self.centerings {
                let mut image = &base + centering;
                if reduce {
                    for i in 0..3 {
                        image[i] = image[i].rem_euclid(1.0);
                        // rem_euclid can return 1.0 for tiny negative inputs
                        if image[i] >= 1.0 {
                            image[i] -= 1.0;
                        }
                    }
                }
                if !images
                    .iter()
                    .any(|(_, seen)| images_match(seen, &image, reduce))
                {
                    images.push((index, image));
                }
            }
        }
        Ok(images)
    }

    /// The number of distinct symmetry-equivalent images of a position
    /// within one unit cell.
    pub fn site_multiplicity(&self, coords: &DVector<f64>) -> Result<usize, SymmetryError> {
        Ok(self.expand(coords, true)?.len())
    }
}

fn images_match(a: &DVector<f64>, b: &DVector<f64>, reduced: bool) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| {
        if reduced {
            let d = (x - y).rem_euclid(1.0);
            d < IMAGE_TOLERANCE || (1.0 - d) < IMAGE_TOLERANCE
        } else {
            (x - y).abs() < IMAGE_TOLERANCE
        }
    })
}

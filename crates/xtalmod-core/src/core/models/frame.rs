use super::atom::Atom;
use super::cell::UnitCell;
use crate::core::modulation::engine::{AxisFilter, ModulationEngine, ModulationError};
use crate::core::symmetry::engine::{SymmetryError, SymmetryOperatorEngine};
use nalgebra::{DVector, Matrix3, Vector3};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors raised while assembling or finalizing frames.
#[derive(Debug, Error)]
pub enum StructureError {
    /// A frame index past the end of the collection.
    #[error("frame {index} does not exist (collection has {count} frames)")]
    FrameOutOfRange {
        /// The requested index.
        index: usize,
        /// Frames currently in the collection.
        count: usize,
    },
    /// Finalize called twice on the same frame.
    #[error("frame {index} has already been finalized")]
    AlreadyFinalized {
        /// The offending frame index.
        index: usize,
    },
    /// Symmetry expansion failed.
    #[error(transparent)]
    Symmetry(#[from] SymmetryError),
    /// Modulation evaluation failed.
    #[error(transparent)]
    Modulation(#[from] ModulationError),
}

/// One model frame: a unit-cell snapshot plus its atoms.
///
/// Atoms hold asymmetric-unit positions until [`StructureCollection::finalize`]
/// replaces them with the full symmetry-expanded, modulated set.
#[derive(Debug, Clone)]
pub struct Frame {
    cell: UnitCell,
    atoms: Vec<Atom>,
    finalized: bool,
}

impl Frame {
    /// The cell this frame was created with.
    pub fn cell(&self) -> &UnitCell {
        &self.cell
    }

    /// The frame's atoms: asymmetric-unit entries before finalize, the
    /// expanded set after.
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Whether finalize has run on this frame.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// An append-only sequence of frames sharing one import session.
#[derive(Debug, Clone, Default)]
pub struct StructureCollection {
    frames: Vec<Frame>,
}

impl StructureCollection {
    /// An empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new frame with the given cell and returns its index.
    pub fn new_frame(&mut self, cell: UnitCell) -> usize {
        self.frames.push(Frame {
            cell,
            atoms: Vec::new(),
            finalized: false,
        });
        self.frames.len() - 1
    }

    /// All frames in creation order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// One frame by index.
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frame has been opened.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn frame_mut(&mut self, index: usize) -> Result<&mut Frame, StructureError> {
        let count = self.frames.len();
        self.frames
            .get_mut(index)
            .ok_or(StructureError::FrameOutOfRange { index, count })
    }

    /// Appends an atom to a not-yet-finalized frame.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::FrameOutOfRange`] for a bad index and
    /// [`StructureError::AlreadyFinalized`] after finalize.
    pub fn add_atom(&mut self, index: usize, atom: Atom) -> Result<(), StructureError> {
        let frame = self.frame_mut(index)?;
        if frame.finalized {
            return Err(StructureError::AlreadyFinalized { index });
        }
        frame.atoms.push(atom);
        Ok(())
    }

    /// Expands a frame to its full atom set, exactly once.
    ///
    /// Per asymmetric-unit atom, in order: symmetry expansion of the (3+d)-
    /// dimensional fractional coordinate, occupancy renormalization
    /// (`occupancy * site multiplicity`, undoing the division stored in M40
    /// files), modulation evaluation of every image at the internal phase
    /// `phase`, and fractional to Cartesian conversion. Each image's
    /// displacement delta is rotated by its generating operator's external
    /// block, and its ADP delta by the matching congruence transform, so an
    /// inversion image receives the negated displacement. The frame's atoms
    /// are replaced with the expanded set.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::AlreadyFinalized`] on a second call, or the
    /// forwarded symmetry or modulation error.
    #[instrument(skip(self, symmetry, modulation, axes), fields(frame = index))]
    pub fn finalize(
        &mut self,
        index: usize,
        symmetry: &SymmetryOperatorEngine,
        modulation: &ModulationEngine,
        phase: &Vector3<f64>,
        axes: &AxisFilter,
    ) -> Result<&[Atom], StructureError> {
        let count = self.frames.len();
        let frame = self
            .frames
            .get_mut(index)
            .ok_or(StructureError::FrameOutOfRange { index, count })?;
        if frame.finalized {
            return Err(StructureError::AlreadyFinalized { index });
        }

        let dim = symmetry.dimension();
        let mut expanded = Vec::new();
        for atom in &frame.atoms {
            let mut coords = DVector::zeros(dim);
            coords[0] = atom.fractional.x;
            coords[1] = atom.fractional.y;
            coords[2] = atom.fractional.z;
            for (i, value) in atom.internal.iter().take(dim - 3).enumerate() {
                coords[3 + i] = *value;
            }

            let images = symmetry.expand_with_operators(&coords, true)?;
            let multiplicity = images.len();
            let site_occupancy = atom.occupancy * multiplicity as f64;
            debug!(
                label = %atom.label,
                multiplicity,
                site_occupancy,
                "expanding site"
            );

            let eval = modulation.evaluate(&atom.label, site_occupancy, phase, axes)?;
            for (op_index, image) in images {
                let gamma = symmetry.operators()[op_index].external_rotation();
                let base = Vector3::new(image[0], image[1], image[2]);
                let fractional = base + gamma * eval.position_delta;
                let mut placed = atom.cloned_at(&atom.label, fractional);
                placed.internal = image.iter().skip(3).copied().collect();
                placed.occupancy = eval.occupancy;
                if atom.adp.is_some() || eval.adp_delta.iter().any(|d| *d != 0.0) {
                    let mut adp = atom.adp.unwrap_or([0.0; 6]);
                    for (slot, delta) in adp.iter_mut().zip(rotate_adp(&eval.adp_delta, &gamma)) {
                        *slot += delta;
                    }
                    placed.adp = Some(adp);
                }
                placed.cartesian = Some(frame.cell.to_cartesian(&fractional));
                expanded.push(placed);
            }
        }

        info!(
            frame = index,
            sites = frame.atoms.len(),
            atoms = expanded.len(),
            "frame finalized"
        );
        frame.atoms = expanded;
        frame.finalized = true;
        Ok(&self.frames[index].atoms)
    }
}

/// Congruence transform of an ADP six-tuple (U11..U23) by a rotation R:
/// U' = R U R^T.
fn rotate_adp(delta: &[f64; 6], r: &Matrix3<f64>) -> [f64; 6] {
    let u = Matrix3::new(
        delta[0], delta[3], delta[4],
        delta[3], delta[1], delta[5],
        delta[4], delta[5], delta[2],
    );
    let t = r * u * r.transpose();
    [
        t[(0, 0)],
        t[(1, 1)],
        t[(2, 2)],
        t[(0, 1)],
        t[(0, 2)],
        t[(1, 2)],
    ]
}

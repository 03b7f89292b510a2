use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker value for a lattice axis that does not apply to the cell.
///
/// One-dimensional (polymer) cells set `b` and `c` to this value; slab cells
/// set only `c`. Degenerate axes still occupy a vector slot so that indexing
/// stays uniform, but they are excluded from the volume.
pub const DEGENERATE_AXIS: f64 = -1.0;

/// Errors raised while constructing a unit cell.
#[derive(Debug, Error)]
pub enum CellError {
    /// A required axis length was zero or negative (and not the degenerate marker).
    #[error("axis '{axis}' has non-positive length {value}; a cell axis must be > 0")]
    NonPositiveAxis {
        /// The offending axis name (`a`, `b`, or `c`).
        axis: char,
        /// The rejected length in Angstroms.
        value: f64,
    },
    /// The cell angles do not describe a realizable parallelepiped.
    #[error("cell angles ({alpha}, {beta}, {gamma}) degrees do not form a valid cell")]
    InvalidAngles {
        /// Alpha in degrees.
        alpha: f64,
        /// Beta in degrees.
        beta: f64,
        /// Gamma in degrees.
        gamma: f64,
    },
    /// Three explicit lattice vectors were linearly dependent.
    #[error("lattice vectors are linearly dependent (zero cell volume)")]
    SingularLattice,
}

/// The six scalar cell parameters: lengths in Angstroms, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellParameters {
    /// Length of the `a` axis.
    pub a: f64,
    /// Length of the `b` axis, or [`DEGENERATE_AXIS`].
    pub b: f64,
    /// Length of the `c` axis, or [`DEGENERATE_AXIS`].
    pub c: f64,
    /// Angle between `b` and `c` in degrees.
    pub alpha: f64,
    /// Angle between `a` and `c` in degrees.
    pub beta: f64,
    /// Angle between `a` and `b` in degrees.
    pub gamma: f64,
}

/// Which of the two cell representations was supplied by the caller.
///
/// The other representation is derived, not authoritative, until explicitly
/// set by a new constructor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellSource {
    /// The cell was set from six scalar parameters.
    Parametric,
    /// The cell was set from three explicit lattice vectors.
    Vectors,
}

/// A crystallographic unit cell with cached coordinate transforms.
///
/// The cell may be set either from six parameters (a, b, c, alpha, beta,
/// gamma) or from three explicit Cartesian lattice vectors; both forms are
/// always derivable from each other once set. The fractional-to-Cartesian
/// matrix and its inverse are computed once per set, with all trigonometry
/// done in radians at that point, so per-point conversions are exact matrix
/// multiplies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    parameters: CellParameters,
    source: CellSource,
    dimension: usize,
    frac_to_cart: Matrix3<f64>,
    cart_to_frac: Matrix3<f64>,
    volume: f64,
}

impl UnitCell {
    /// Builds a cell from the six scalar parameters.
    ///
    /// `b` and `c` may be [`DEGENERATE_AXIS`] to denote a slab (`c` only) or
    /// polymer (`b` and `c`) cell; degenerate axes take a unit placeholder in
    /// the transform and are excluded from the volume.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::NonPositiveAxis`] for a zero or negative required
    /// axis, or [`CellError::InvalidAngles`] if the angles cannot close a
    /// parallelepiped.
    pub fn from_parameters(
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<Self, CellError> {
        check_axis('a', a)?;
        check_axis('b', b)?;
        check_axis('c', c)?;
        if b == DEGENERATE_AXIS && c != DEGENERATE_AXIS {
            // a polymer cell drops both b and c; a lone missing b is rejected
            return Err(CellError::NonPositiveAxis { axis: 'b', value: b });
        }
        let dimension = 3
            - usize::from(b == DEGENERATE_AXIS)
            - usize::from(c == DEGENERATE_AXIS);

        // Placeholder length 1 and right angles for degenerate axes keep the
        // transform invertible and the index layout uniform.
        let (eb, ec) = (
            if b == DEGENERATE_AXIS { 1.0 } else { b },
            if c == DEGENERATE_AXIS { 1.0 } else { c },
        );
        let (ealpha, ebeta) = if dimension < 3 { (90.0, 90.0) } else { (alpha, beta) };
        let egamma = if dimension < 2 { 90.0 } else { gamma };

        let (sin_alpha, cos_alpha) = ealpha.to_radians().sin_cos();
        let (sin_beta, cos_beta) = ebeta.to_radians().sin_cos();
        let (sin_gamma, cos_gamma) = egamma.to_radians().sin_cos();

        let unit_volume_sq = sin_alpha * sin_alpha + sin_beta * sin_beta
            + sin_gamma * sin_gamma
            + 2.0 * cos_alpha * cos_beta * cos_gamma
            - 2.0;
        if unit_volume_sq <= 0.0 || sin_gamma.abs() < 1e-10 {
            return Err(CellError::InvalidAngles { alpha, beta, gamma });
        }
        let unit_volume = unit_volume_sq.sqrt();

        // Standard setting: a along x, b in the xy plane.
        let frac_to_cart = Matrix3::from_columns(&[
            Vector3::new(a, 0.0, 0.0),
            Vector3::new(eb * cos_gamma, eb * sin_gamma, 0.0),
            Vector3::new(
                ec * cos_beta,
                ec * (cos_alpha - cos_beta * cos_gamma) / sin_gamma,
                ec * unit_volume / sin_gamma,
            ),
        ]);
        let cart_to_frac = frac_to_cart
            .try_inverse()
            .ok_or(CellError::InvalidAngles { alpha, beta, gamma })?;

        let volume = match dimension {
            1 => a,
            2 => a * eb * sin_gamma,
            _ => a * eb * ec * unit_volume,
        };

        Ok(Self {
            parameters: CellParameters { a, b, c, alpha, beta, gamma },
            source: CellSource::Parametric,
            dimension,
            frac_to_cart,
            cart_to_frac,
            volume,
        })
    }

    /// Builds a cell from three explicit Cartesian lattice vectors.
    ///
    /// The scalar parameters become the derived representation.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::SingularLattice`] if the vectors do not span a
    /// positive volume.
    pub fn from_vectors(
        v0: Vector3<f64>,
        v1: Vector3<f64>,
        v2: Vector3<f64>,
    ) -> Result<Self, CellError> {
        let frac_to_cart = Matrix3::from_columns(&[v0, v1, v2]);
        let cart_to_frac = frac_to_cart
            .try_inverse()
            .ok_or(CellError::SingularLattice)?;
        let (a, b, c) = (v0.norm(), v1.norm(), v2.norm());
        if a <= 0.0 || b <= 0.0 || c <= 0.0 {
            return Err(CellError::SingularLattice);
        }
        let angle = |u: &Vector3<f64>, w: &Vector3<f64>| {
            (u.dot(w) / (u.norm() * w.norm())).clamp(-1.0, 1.0).acos().to_degrees()
        };
        Ok(Self {
            parameters: CellParameters {
                a,
                b,
                c,
                alpha: angle(&v1, &v2),
                beta: angle(&v0, &v2),
                gamma: angle(&v0, &v1),
            },
            source: CellSource::Vectors,
            dimension: 3,
            frac_to_cart,
            cart_to_frac,
            volume: frac_to_cart.determinant().abs(),
        })
    }

    /// The six scalar parameters (derived when the cell was set from vectors).
    pub fn parameters(&self) -> &CellParameters {
        &self.parameters
    }

    /// Which representation is currently authoritative.
    pub fn source(&self) -> CellSource {
        self.source
    }

    /// The three lattice vectors in Cartesian Angstroms (derived when the
    /// cell was set parametrically).
    pub fn vectors(&self) -> [Vector3<f64>; 3] {
        [
            self.frac_to_cart.column(0).into(),
            self.frac_to_cart.column(1).into(),
            self.frac_to_cart.column(2).into(),
        ]
    }

    /// Cell periodicity: 3 for a bulk crystal, 2 for a slab, 1 for a polymer.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Cell volume in cubic Angstroms, excluding degenerate axes (so a slab
    /// cell reports an area and a polymer cell a length).
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Converts a fractional coordinate to Cartesian Angstroms.
    pub fn to_cartesian(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.frac_to_cart * fractional
    }

    /// Converts a Cartesian coordinate to fractional units.
    pub fn to_fractional(&self, cartesian: &Vector3<f64>) -> Vector3<f64> {
        self.cart_to_frac * cartesian
    }
}

fn check_axis(axis: char, value: f64) -> Result<(), CellError> {
    if value <= 0.0 && value != DEGENERATE_AXIS {
        return Err(CellError::NonPositiveAxis { axis, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn cubic_cell_transform_is_diagonal() {
        let cell = UnitCell::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0).unwrap();
        let p = cell.to_cartesian(&Vector3::new(0.25, 0.25, 0.25));
        assert!(close(p.x, 1.25, 1e-12));
        assert!(close(p.y, 1.25, 1e-12));
        assert!(close(p.z, 1.25, 1e-12));
        assert!(close(cell.volume(), 125.0, 1e-9));
    }

    #[test]
    fn fractional_cartesian_round_trip_triclinic() {
        let cell =
            UnitCell::from_parameters(8.987, 15.503, 12.258, 92.5, 101.2, 115.7).unwrap();
        for p in [
            Vector3::new(0.1, 0.2, 0.3),
            Vector3::new(-0.4, 0.9, 1.7),
            Vector3::new(0.0, 0.0, 0.0),
        ] {
            let back = cell.to_fractional(&cell.to_cartesian(&p));
            assert!((back - p).norm() < 1e-6);
        }
    }

    #[test]
    fn vector_cell_derives_parameters() {
        let cell = UnitCell::from_vectors(
            Vector3::new(4.0, 0.0, 0.0),
            Vector3::new(0.0, 6.0, 0.0),
            Vector3::new(0.0, 0.0, 8.0),
        )
        .unwrap();
        let p = cell.parameters();
        assert!(close(p.a, 4.0, 1e-12));
        assert!(close(p.b, 6.0, 1e-12));
        assert!(close(p.c, 8.0, 1e-12));
        assert!(close(p.alpha, 90.0, 1e-9));
        assert_eq!(cell.source(), CellSource::Vectors);
        assert!(close(cell.volume(), 192.0, 1e-9));
    }

    #[test]
    fn parametric_cell_derives_vectors() {
        let cell = UnitCell::from_parameters(3.0, 3.0, 3.0, 90.0, 90.0, 120.0).unwrap();
        let [va, vb, _] = cell.vectors();
        assert!(close(va.norm(), 3.0, 1e-9));
        assert!(close(vb.norm(), 3.0, 1e-9));
        let cos_gamma = va.dot(&vb) / (va.norm() * vb.norm());
        assert!(close(cos_gamma, -0.5, 1e-9));
    }

    #[test]
    fn degenerate_axes_reduce_dimension_and_volume() {
        let slab = UnitCell::from_parameters(4.0, 5.0, DEGENERATE_AXIS, 90.0, 90.0, 90.0)
            .unwrap();
        assert_eq!(slab.dimension(), 2);
        assert!(close(slab.volume(), 20.0, 1e-9));

        let polymer = UnitCell::from_parameters(
            4.0,
            DEGENERATE_AXIS,
            DEGENERATE_AXIS,
            90.0,
            90.0,
            90.0,
        )
        .unwrap();
        assert_eq!(polymer.dimension(), 1);
        assert!(close(polymer.volume(), 4.0, 1e-9));
    }

    #[test]
    fn non_positive_axis_is_rejected() {
        assert!(matches!(
            UnitCell::from_parameters(0.0, 5.0, 5.0, 90.0, 90.0, 90.0),
            Err(CellError::NonPositiveAxis { axis: 'a', .. })
        ));
        assert!(matches!(
            UnitCell::from_parameters(5.0, -2.0, 5.0, 90.0, 90.0, 90.0),
            Err(CellError::NonPositiveAxis { axis: 'b', .. })
        ));
    }

    #[test]
    fn impossible_angles_are_rejected() {
        assert!(matches!(
            UnitCell::from_parameters(5.0, 5.0, 5.0, 10.0, 170.0, 90.0),
            Err(CellError::InvalidAngles { .. })
        ));
    }
}

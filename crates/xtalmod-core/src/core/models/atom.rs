use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Anisotropic displacement parameters in the order U11, U22, U33, U12, U13, U23.
pub type AdpTensor = [f64; 6];

/// An atom record in a crystallographic structure.
///
/// Atoms are created by an importer with fractional coordinates, cloned by
/// symmetry expansion, offset by modulation evaluation, and destroyed only by
/// collection-level reset. When the structure is modulated (`mod_dim > 0`)
/// the coordinate is (3 + d)-dimensional: the three external fractional
/// components plus `internal` superspace components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// The atom label as written in the source file (e.g. "Na1", "O3_2").
    pub label: String,
    /// The element symbol (e.g. "Na", "O").
    pub element: String,
    /// External fractional coordinates.
    pub fractional: Vector3<f64>,
    /// Internal (superspace) coordinates; empty for an unmodulated structure.
    pub internal: Vec<f64>,
    /// Site occupancy in [0, 1] as written by the source, before any
    /// site-multiplicity renormalization.
    pub occupancy: f64,
    /// Optional anisotropic displacement parameters.
    pub adp: Option<AdpTensor>,
    /// Optional vibration or spin vector, in fractional units.
    pub vibration: Option<Vector3<f64>>,
    /// Cartesian coordinates in Angstroms; populated by frame finalization.
    pub cartesian: Option<Vector3<f64>>,
}

impl Atom {
    /// Creates a new atom with the element symbol inferred from the label.
    ///
    /// # Arguments
    ///
    /// * `label` - The atom label from the source file.
    /// * `fractional` - External fractional coordinates.
    /// * `occupancy` - Site occupancy in [0, 1].
    pub fn new(label: &str, fractional: Vector3<f64>, occupancy: f64) -> Self {
        Self {
            label: label.to_string(),
            element: element_from_label(label),
            fractional,
            internal: Vec::new(),
            occupancy,
            adp: None,
            vibration: None,
            cartesian: None,
        }
    }

    /// Returns a clone with a new label and fractional position, keeping
    /// element, occupancy, ADPs, and vibration. Used by symmetry expansion
    /// and rigid-body placement.
    pub fn cloned_at(&self, label: &str, fractional: Vector3<f64>) -> Self {
        Self {
            label: label.to_string(),
            fractional,
            cartesian: None,
            ..self.clone()
        }
    }
}

/// Infers an element symbol from an atom label ("Na1" -> "Na", "O3" -> "O").
///
/// The first character of the leading alphabetic run is capitalized; a second
/// character is kept only when it is lowercase, so suffix letters in labels
/// like "O3ax" are not mistaken for part of the symbol.
pub fn element_from_label(label: &str) -> String {
    let prefix: String = label.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let mut chars = prefix.chars();
    let mut element = String::new();
    if let Some(first) = chars.next() {
        element.push(first.to_ascii_uppercase());
        if let Some(second) = chars.next() {
            if second.is_ascii_lowercase() {
                element.push(second);
            }
        }
    }
    element
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_atom_has_expected_defaults() {
        let atom = Atom::new("Zn", Vector3::new(0.5, 0.25, 0.4), 0.244);
        assert_eq!(atom.label, "Zn");
        assert_eq!(atom.element, "Zn");
        assert_eq!(atom.occupancy, 0.244);
        assert!(atom.internal.is_empty());
        assert!(atom.adp.is_none());
        assert!(atom.cartesian.is_none());
    }

    #[test]
    fn element_inference_from_labels() {
        assert_eq!(element_from_label("Na1"), "Na");
        assert_eq!(element_from_label("O3"), "O");
        assert_eq!(element_from_label("ZN"), "Z");
        assert_eq!(element_from_label("Fe2b"), "Fe");
        assert_eq!(element_from_label("1"), "");
    }

    #[test]
    fn cloned_at_keeps_physics_but_moves() {
        let mut atom = Atom::new("Na1", Vector3::new(0.5, 0.5, 0.0), 0.8);
        atom.adp = Some([0.01, 0.01, 0.01, 0.0, 0.0, 0.0]);
        atom.cartesian = Some(Vector3::new(1.0, 2.0, 3.0));
        let image = atom.cloned_at("Na1_2", Vector3::new(0.5, 0.0, 0.5));
        assert_eq!(image.label, "Na1_2");
        assert_eq!(image.element, "Na");
        assert_eq!(image.occupancy, 0.8);
        assert_eq!(image.adp, atom.adp);
        assert_eq!(image.fractional, Vector3::new(0.5, 0.0, 0.5));
        assert!(image.cartesian.is_none());
    }
}

use super::engine::{ModulationEngine, ModulationError};
use super::wave::{Axis, WaveForm, WaveKey, WaveKind};
use crate::core::models::cell::UnitCell;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::{debug, warn};

/// Which angle convention a fragment position's three rotation angles use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationConvention {
    /// Euler angles: phi about z, chi about x, psi about z.
    Euler,
    /// Axial angles: phi about z, chi about y, psi about x.
    Axial,
}

/// One atom of a rigid-body fragment template, in fractional coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentMember {
    /// The template atom's label.
    pub label: String,
    /// Fractional position of the template atom.
    pub fractional: Vector3<f64>,
}

/// A rigid-body fragment template: a reference point plus member atoms.
///
/// The template itself never appears in the output structure; each
/// [`FragmentPosition`] applied to it produces one placed copy of every
/// member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyFragment {
    /// Fragment name.
    pub name: String,
    /// The reference point `rho` the rotation pivots about, fractional.
    pub reference: Vector3<f64>,
    /// Member atoms in declaration order.
    pub members: Vec<FragmentMember>,
}

/// Rotational displacement amplitudes attached to one fragment position,
/// one entry per harmonic order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationalWave {
    /// Harmonic order n.
    pub order: u32,
    /// Sine amplitude vector, fractional.
    pub sin: Vector3<f64>,
    /// Cosine amplitude vector, fractional.
    pub cos: Vector3<f64>,
}

/// One placement of the active fragment: a translation, a rotation, and the
/// modulation waves recorded against the position's own label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentPosition {
    /// Label of the position record; its cataloged waves are copied to every
    /// placed member.
    pub source: String,
    /// Suffix appended to member labels for this placement.
    pub suffix: String,
    /// Offset of the placement's reference point from the template's,
    /// fractional.
    pub translation: Vector3<f64>,
    /// Rotation angles phi, chi, psi in degrees.
    pub angles_deg: [f64; 3],
    /// Angle convention for `angles_deg`.
    pub convention: RotationConvention,
    /// Whether the rotation is improper (rotoinversion).
    pub improper: bool,
    /// Rotational displacement waves of this position.
    pub rotations: Vec<RotationalWave>,
}

impl FragmentPosition {
    /// The Cartesian rotation matrix of this position.
    ///
    /// Built as phi * chi * psi in the position's convention and negated
    /// when improper.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        let [phi, chi, psi] = self.angles_deg.map(f64::to_radians);
        let axial = self.convention == RotationConvention::Axial;
        let q_phi = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), phi);
        let q_chi = UnitQuaternion::from_axis_angle(
            &if axial { Vector3::y_axis() } else { Vector3::x_axis() },
            chi,
        );
        let q_psi = UnitQuaternion::from_axis_angle(
            &if axial { Vector3::x_axis() } else { Vector3::z_axis() },
            psi,
        );
        let mut m = (q_phi * q_chi * q_psi).to_rotation_matrix().into_inner();
        if self.improper {
            m = -m;
        }
        m
    }
}

/// One output atom produced by applying a fragment position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedMember {
    /// Label of the template member this atom was derived from.
    pub source: String,
    /// Label of the placed atom (member label plus position suffix).
    pub label: String,
    /// Fractional position of the placed atom.
    pub fractional: Vector3<f64>,
}

impl ModulationEngine {
    /// Starts a new rigid-body fragment template, replacing any active one.
    pub fn begin_fragment(&mut self, name: &str, reference: Vector3<f64>) {
        self.fragment = Some(RigidBodyFragment {
            name: name.to_string(),
            reference,
            members: Vec::new(),
        });
    }

    /// Appends a member atom to the active fragment template.
    ///
    /// # Errors
    ///
    /// Returns [`ModulationError::NoActiveFragment`] if no fragment has been
    /// begun.
    pub fn add_fragment_member(
        &mut self,
        label: &str,
        fractional: Vector3<f64>,
    ) -> Result<(), ModulationError> {
        let fragment = self
            .fragment
            .as_mut()
            .ok_or(ModulationError::NoActiveFragment)?;
        fragment.members.push(FragmentMember {
            label: label.to_string(),
            fractional,
        });
        Ok(())
    }

    /// The fragment template currently being populated, if any.
    pub fn active_fragment(&self) -> Option<&RigidBodyFragment> {
        self.fragment.as_ref()
    }

    /// Drops the active fragment template.
    pub fn clear_fragment(&mut self) {
        self.fragment = None;
    }

    /// Applies one position of the active fragment, producing a placed atom
    /// per member.
    ///
    /// For each member the placed position is `rho + translation + vR`,
    /// where `vR` is the member's Cartesian offset from the reference point
    /// rotated by the position's matrix and brought back to fractional
    /// coordinates. The position's cataloged waves are copied to the placed
    /// atom's label with the phase correction `x = q_n . vR` applied:
    /// Fourier amplitudes are recombined via the angle-sum identities and
    /// crenel or sawtooth centers shift by `x`. Displacement waves
    /// additionally absorb the rotational cross terms and are rotated by the
    /// position's matrix before being phased.
    ///
    /// # Errors
    ///
    /// Returns [`ModulationError::NoActiveFragment`] with no active
    /// template, or [`ModulationError::UndefinedWaveVector`] if any copied
    /// wave's order has no wave vector.
    pub fn apply_fragment_position(
        &mut self,
        position: &FragmentPosition,
        cell: &UnitCell,
    ) -> Result<Vec<PlacedMember>, ModulationError> {
        let fragment = self
            .fragment
            .clone()
            .ok_or(ModulationError::NoActiveFragment)?;
        let rot = position.rotation_matrix();
        debug!(
            fragment = %fragment.name,
            position = %position.source,
            members = fragment.members.len(),
            "applying fragment position"
        );
        let mut placed = Vec::with_capacity(fragment.members.len());
        for member in &fragment.members {
            let v0 = member.fractional - fragment.reference;
            let v0_cart = cell.to_cartesian(&v0);
            let v_r = cell.to_fractional(&(rot * v0_cart));
            let label = format!("{}{}", member.label, position.suffix);

            self.copy_position_waves(&position.source, &label, &v_r)?;
            self.apply_rotational_waves(position, &label, &v0_cart, &v_r, cell, &rot)?;
            let o0 = self.occupancy_base(&position.source);
            self.set_occupancy_base(&label, o0);

            placed.push(PlacedMember {
                source: member.label.clone(),
                label,
                fractional: fragment.reference + position.translation + v_r,
            });
        }
        Ok(placed)
    }

    /// Copies every wave of `source` to `dest`. Occupancy and ADP waves are
    /// phase-corrected here; displacement waves are copied raw and phased
    /// after rotation in [`Self::apply_rotational_waves`].
    fn copy_position_waves(
        &mut self,
        source: &str,
        dest: &str,
        v_r: &Vector3<f64>,
    ) -> Result<(), ModulationError> {
        let copied: Vec<(WaveKey, WaveForm)> = self
            .waves_for(source)
            .map(|(key, form)| (key.clone(), *form))
            .collect();
        for (key, form) in copied {
            let shift = self.wave_vector(key.order)?.dot(v_r);
            let new_key = WaveKey::new(key.kind, dest, key.order);
            let new_form = match key.kind {
                WaveKind::Occupancy | WaveKind::Adp(_) => phase_shifted(form, shift),
                WaveKind::Displacement(_) => match form {
                    WaveForm::Fourier { .. } => form,
                    WaveForm::Sawtooth { center, width, amplitude } => WaveForm::Sawtooth {
                        center: center + shift,
                        width,
                        amplitude,
                    },
                    other => {
                        warn!(key = %new_key, "copying non-Fourier displacement wave without phase correction");
                        other
                    }
                },
            };
            self.insert_wave_unchecked(new_key, new_form);
        }
        Ok(())
    }

    /// Folds the position's rotational displacement amplitudes into the
    /// waves just copied to `dest`: cross each amplitude vector with the
    /// member's Cartesian offset, add the translational amplitudes, rotate
    /// the combined vectors by the position's matrix, and store them with
    /// the phase correction applied. A non-Fourier copy (sawtooth, Legendre)
    /// on an axis is left in place rather than overwritten.
    fn apply_rotational_waves(
        &mut self,
        position: &FragmentPosition,
        dest: &str,
        v0_cart: &Vector3<f64>,
        v_r: &Vector3<f64>,
        cell: &UnitCell,
        rot: &Matrix3<f64>,
    ) -> Result<(), ModulationError> {
        for wave in &position.rotations {
            let shift = self.wave_vector(wave.order)?.dot(v_r);
            let cross = |amplitude: &Vector3<f64>| {
                cell.to_fractional(&cell.to_cartesian(amplitude).cross(v0_cart))
            };
            let mut vsin = cross(&wave.sin);
            let mut vcos = cross(&wave.cos);

            for axis in Axis::ALL {
                let key = WaveKey::new(WaveKind::Displacement(axis), dest, wave.order);
                if let Some(WaveForm::Fourier { sin, cos }) = self.wave(&key) {
                    vsin[axis.index()] += sin;
                    vcos[axis.index()] += cos;
                }
            }

            vsin = cell.to_fractional(&(rot * cell.to_cartesian(&vsin)));
            vcos = cell.to_fractional(&(rot * cell.to_cartesian(&vcos)));

            for axis in Axis::ALL {
                let key = WaveKey::new(WaveKind::Displacement(axis), dest, wave.order);
                // a sawtooth or Legendre copy on this axis keeps its own form
                if let Some(existing) = self.wave(&key) {
                    if !matches!(existing, WaveForm::Fourier { .. }) {
                        continue;
                    }
                }
                let form = phase_shifted(
                    WaveForm::Fourier {
                        sin: vsin[axis.index()],
                        cos: vcos[axis.index()],
                    },
                    shift,
                );
                self.insert_wave_unchecked(key, form);
            }
        }
        Ok(())
    }
}

/// Applies the phase correction `x` (in cycles) to a wave: Fourier
/// amplitudes via `sin(a+x)` / `cos(a+x)` angle-sum identities, window
/// functions by shifting their center.
fn phase_shifted(form: WaveForm, shift: f64) -> WaveForm {
    match form {
        WaveForm::Fourier { sin, cos } => {
            let (s_x, c_x) = (TAU * shift).sin_cos();
            WaveForm::Fourier {
                sin: sin * c_x + cos * s_x,
                cos: -sin * s_x + cos * c_x,
            }
        }
        WaveForm::Crenel { center, width } => WaveForm::Crenel {
            center: center + shift,
            width,
        },
        WaveForm::Sawtooth { center, width, amplitude } => WaveForm::Sawtooth {
            center: center + shift,
            width,
            amplitude,
        },
        WaveForm::Legendre { .. } => form,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic_cell(edge: f64) -> UnitCell {
        UnitCell::from_parameters(edge, edge, edge, 90.0, 90.0, 90.0).unwrap()
    }

    fn plain_position(source: &str) -> FragmentPosition {
        FragmentPosition {
            source: source.to_string(),
            suffix: "_1".to_string(),
            translation: Vector3::zeros(),
            angles_deg: [0.0; 3],
            convention: RotationConvention::Euler,
            improper: false,
            rotations: Vec::new(),
        }
    }

    #[test]
    fn member_operations_require_an_active_fragment() {
        let mut engine = ModulationEngine::new(1);
        assert_eq!(
            engine.add_fragment_member("C1", Vector3::zeros()),
            Err(ModulationError::NoActiveFragment)
        );
    }

    #[test]
    fn identity_position_reproduces_member_coordinates() {
        let cell = cubic_cell(5.0);
        let mut engine = ModulationEngine::new(1);
        engine.add_wave_vector(1, Vector3::new(0.0, 0.0, 0.3));
        engine.begin_fragment("mol", Vector3::new(0.25, 0.25, 0.25));
        engine
            .add_fragment_member("C1", Vector3::new(0.35, 0.25, 0.25))
            .unwrap();
        let placed = engine
            .apply_fragment_position(&plain_position("pos1"), &cell)
            .unwrap();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].label, "C1_1");
        assert!((placed[0].fractional - Vector3::new(0.35, 0.25, 0.25)).norm() < 1e-9);
    }

    #[test]
    fn improper_identity_inverts_the_member_offset() {
        let cell = cubic_cell(5.0);
        let mut engine = ModulationEngine::new(1);
        engine.begin_fragment("mol", Vector3::new(0.25, 0.25, 0.25));
        engine
            .add_fragment_member("C1", Vector3::new(0.35, 0.25, 0.25))
            .unwrap();
        let mut position = plain_position("pos1");
        position.improper = true;
        let placed = engine.apply_fragment_position(&position, &cell).unwrap();
        assert!((placed[0].fractional - Vector3::new(0.15, 0.25, 0.25)).norm() < 1e-9);
    }

    #[test]
    fn axial_phi_rotates_about_z() {
        let cell = cubic_cell(5.0);
        let mut engine = ModulationEngine::new(1);
        engine.begin_fragment("mol", Vector3::zeros());
        engine
            .add_fragment_member("C1", Vector3::new(0.1, 0.0, 0.0))
            .unwrap();
        let mut position = plain_position("pos1");
        position.convention = RotationConvention::Axial;
        position.angles_deg = [90.0, 0.0, 0.0];
        let placed = engine.apply_fragment_position(&position, &cell).unwrap();
        assert!((placed[0].fractional - Vector3::new(0.0, 0.1, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn euler_and_axial_conventions_differ_in_second_axis() {
        let mut euler = plain_position("p");
        euler.angles_deg = [0.0, 90.0, 0.0];
        let mut axial = euler.clone();
        axial.convention = RotationConvention::Axial;
        let v = Vector3::new(0.0, 0.0, 1.0);
        // chi about x sends z to y with a sign; chi about y sends z to x
        let ve = euler.rotation_matrix() * v;
        let va = axial.rotation_matrix() * v;
        assert!((ve - Vector3::new(0.0, -1.0, 0.0)).norm() < 1e-9);
        assert!((va - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn occupancy_wave_is_phase_corrected_on_copy() {
        let cell = cubic_cell(5.0);
        let mut engine = ModulationEngine::new(1);
        engine.add_wave_vector(1, Vector3::new(0.0, 0.0, 0.5));
        engine
            .add_wave(
                WaveKey::new(WaveKind::Occupancy, "pos1", 1),
                WaveForm::Fourier { sin: 1.0, cos: 0.0 },
            )
            .unwrap();
        engine.begin_fragment("mol", Vector3::zeros());
        // offset 0.5 along z gives shift q.vR = 0.25 cycles
        engine
            .add_fragment_member("C1", Vector3::new(0.0, 0.0, 0.5))
            .unwrap();
        let placed = engine
            .apply_fragment_position(&plain_position("pos1"), &cell)
            .unwrap();
        let copied = engine
            .wave(&WaveKey::new(WaveKind::Occupancy, &placed[0].label, 1))
            .copied()
            .unwrap();
        match copied {
            WaveForm::Fourier { sin, cos } => {
                assert!(sin.abs() < 1e-9);
                assert!((cos + 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn member_at_reference_point_copies_waves_unchanged() {
        let cell = cubic_cell(5.0);
        let mut engine = ModulationEngine::new(1);
        engine.add_wave_vector(1, Vector3::new(0.0, 0.0, 0.5));
        engine
            .add_wave(
                WaveKey::new(WaveKind::Occupancy, "pos1", 1),
                WaveForm::Fourier { sin: 0.3, cos: 0.4 },
            )
            .unwrap();
        engine.begin_fragment("mol", Vector3::new(0.25, 0.25, 0.25));
        engine
            .add_fragment_member("C1", Vector3::new(0.25, 0.25, 0.25))
            .unwrap();
        let placed = engine
            .apply_fragment_position(&plain_position("pos1"), &cell)
            .unwrap();
        let copied = engine
            .wave(&WaveKey::new(WaveKind::Occupancy, &placed[0].label, 1))
            .copied()
            .unwrap();
        assert_eq!(copied, WaveForm::Fourier { sin: 0.3, cos: 0.4 });
    }

    #[test]
    fn crenel_center_shifts_instead_of_recombining() {
        let cell = cubic_cell(5.0);
        let mut engine = ModulationEngine::new(1);
        engine.add_wave_vector(1, Vector3::new(0.0, 0.0, 0.5));
        engine
            .add_wave(
                WaveKey::new(WaveKind::Occupancy, "pos1", 1),
                WaveForm::Crenel { center: 0.1, width: 0.4 },
            )
            .unwrap();
        engine.begin_fragment("mol", Vector3::zeros());
        engine
            .add_fragment_member("C1", Vector3::new(0.0, 0.0, 0.5))
            .unwrap();
        let placed = engine
            .apply_fragment_position(&plain_position("pos1"), &cell)
            .unwrap();
        let copied = engine
            .wave(&WaveKey::new(WaveKind::Occupancy, &placed[0].label, 1))
            .copied()
            .unwrap();
        match copied {
            WaveForm::Crenel { center, width } => {
                assert!((center - 0.35).abs() < 1e-9);
                assert_eq!(width, 0.4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rotational_wave_adds_cross_term_displacement() {
        let cell = cubic_cell(1.0);
        let mut engine = ModulationEngine::new(1);
        engine.add_wave_vector(1, Vector3::new(0.0, 0.0, 0.3));
        engine.begin_fragment("mol", Vector3::zeros());
        // offset along x so the shift q.vR vanishes
        engine
            .add_fragment_member("C1", Vector3::new(1.0, 0.0, 0.0))
            .unwrap();
        let mut position = plain_position("pos1");
        position.rotations.push(RotationalWave {
            order: 1,
            sin: Vector3::new(0.0, 0.0, 1.0),
            cos: Vector3::zeros(),
        });
        let placed = engine.apply_fragment_position(&position, &cell).unwrap();
        // (0,0,1) x (1,0,0) = (0,1,0)
        let wave = engine
            .wave(&WaveKey::new(
                WaveKind::Displacement(Axis::Y),
                &placed[0].label,
                1,
            ))
            .copied()
            .unwrap();
        match wave {
            WaveForm::Fourier { sin, cos } => {
                assert!((sin - 1.0).abs() < 1e-9);
                assert!(cos.abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
        let x_wave = engine
            .wave(&WaveKey::new(
                WaveKind::Displacement(Axis::X),
                &placed[0].label,
                1,
            ))
            .copied()
            .unwrap();
        assert_eq!(x_wave, WaveForm::Fourier { sin: 0.0, cos: 0.0 });
    }

    #[test]
    fn sawtooth_displacement_survives_rotational_waves() {
        let cell = cubic_cell(1.0);
        let mut engine = ModulationEngine::new(1);
        engine.add_wave_vector(1, Vector3::new(0.0, 0.0, 0.3));
        engine
            .add_wave(
                WaveKey::new(WaveKind::Displacement(Axis::Z), "pos1", 1),
                WaveForm::Sawtooth { center: 0.2, width: 0.4, amplitude: 0.05 },
            )
            .unwrap();
        engine.begin_fragment("mol", Vector3::zeros());
        // offset along x so the shift q.vR vanishes
        engine
            .add_fragment_member("C1", Vector3::new(1.0, 0.0, 0.0))
            .unwrap();
        let mut position = plain_position("pos1");
        position.rotations.push(RotationalWave {
            order: 1,
            sin: Vector3::new(0.0, 0.0, 1.0),
            cos: Vector3::zeros(),
        });
        let placed = engine.apply_fragment_position(&position, &cell).unwrap();
        // the cross term lands on y, the z sawtooth keeps its window
        let z = engine
            .wave(&WaveKey::new(
                WaveKind::Displacement(Axis::Z),
                &placed[0].label,
                1,
            ))
            .copied()
            .unwrap();
        assert_eq!(
            z,
            WaveForm::Sawtooth { center: 0.2, width: 0.4, amplitude: 0.05 }
        );
        let y = engine
            .wave(&WaveKey::new(
                WaveKind::Displacement(Axis::Y),
                &placed[0].label,
                1,
            ))
            .copied()
            .unwrap();
        match y {
            WaveForm::Fourier { sin, cos } => {
                assert!((sin - 1.0).abs() < 1e-9);
                assert!(cos.abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn occupancy_baseline_carries_to_placed_members() {
        let cell = cubic_cell(5.0);
        let mut engine = ModulationEngine::new(1);
        engine.set_occupancy_base("pos1", 0.85);
        engine.begin_fragment("mol", Vector3::zeros());
        engine
            .add_fragment_member("C1", Vector3::zeros())
            .unwrap();
        let placed = engine
            .apply_fragment_position(&plain_position("pos1"), &cell)
            .unwrap();
        assert!((engine.occupancy_base(&placed[0].label) - 0.85).abs() < 1e-12);
    }
}

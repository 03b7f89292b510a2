use super::wave::{Axis, Contribution, WaveForm, WaveKey, WaveKind};
use nalgebra::Vector3;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// A modulation capability the source file requests but the engine does not
/// implement. These are surfaced as typed errors so callers can report
/// "feature not implemented" rather than "bad file".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnsupportedFeature {
    /// A rigid-body position whose local coordinate system is not the basic
    /// crystallographic setting.
    #[error("non-basic local coordinate system on a rigid-body position")]
    LocalCoordinateSystem,
    /// A molecule definition referencing point-group symmetry.
    #[error("molecule position based on point-group symmetry")]
    PointGroupReference,
    /// Full translation-libration-screw tensor modulation.
    #[error("translation-libration-screw (TLS) tensor modulation")]
    TlsModulation,
    /// Composite (multi-subsystem) structures.
    #[error("composite subsystem description")]
    CompositeSubsystem,
}

/// Errors raised by the modulation engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModulationError {
    /// A wave references harmonic order n but neither `W_n` nor `W_1` is
    /// defined.
    #[error("no wave vector W_{order} is defined (and no W_1 to derive it from)")]
    UndefinedWaveVector {
        /// The harmonic order with no matching wave vector.
        order: u32,
    },
    /// A wave payload that is meaningless for its kind (e.g. a crenel window
    /// filed under an ADP component).
    #[error("wave form {form:?} is not valid for key {key}")]
    InvalidWaveForm {
        /// The offending catalog key.
        key: WaveKey,
        /// The rejected payload.
        form: WaveForm,
    },
    /// A fragment operation with no fragment begun.
    #[error("no rigid-body fragment is active")]
    NoActiveFragment,
    /// An explicitly unsupported modulation feature.
    #[error("unsupported modulation feature: {0}")]
    Unsupported(#[from] UnsupportedFeature),
}

/// Restricts displacement evaluation to a subset of the crystallographic
/// axes (the `MODAXES` load option of the source formats).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisFilter {
    allowed: [bool; 3],
}

impl AxisFilter {
    /// A filter passing all three axes.
    pub fn all() -> Self {
        Self { allowed: [true; 3] }
    }

    /// A filter passing only the listed axes.
    pub fn only(axes: &[Axis]) -> Self {
        let mut allowed = [false; 3];
        for axis in axes {
            allowed[axis.index()] = true;
        }
        Self { allowed }
    }

    /// Whether displacement along `axis` is evaluated.
    pub fn allows(&self, axis: Axis) -> bool {
        self.allowed[axis.index()]
    }
}

impl Default for AxisFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// The result of evaluating every modulation wave of one atom at one
/// internal phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Final absolute occupancy in [0, 1].
    pub occupancy: f64,
    /// Fractional positional offset to add to the atom's base position.
    pub position_delta: Vector3<f64>,
    /// Offset to add to the atom's ADP tensor, component order U11..U23.
    pub adp_delta: [f64; 6],
}

/// Stores wave-vector definitions and per-atom modulation terms, and
/// evaluates them at an arbitrary internal phase.
///
/// The engine is a plain value owned by one import session; independent
/// imports use independent engines.
#[derive(Debug, Clone, Default)]
pub struct ModulationEngine {
    mod_dim: usize,
    wave_vectors: BTreeMap<u32, Vector3<f64>>,
    waves: BTreeMap<WaveKey, WaveForm>,
    occupancy_base: BTreeMap<String, f64>,
    pub(super) fragment: Option<super::rigid::RigidBodyFragment>,
}

impl ModulationEngine {
    /// Creates an engine for modulation dimension `mod_dim`.
    pub fn new(mod_dim: usize) -> Self {
        Self {
            mod_dim,
            ..Self::default()
        }
    }

    /// The modulation dimension d.
    pub fn mod_dim(&self) -> usize {
        self.mod_dim
    }

    /// Defines the cell wave vector `W_order`.
    pub fn add_wave_vector(&mut self, order: u32, q: Vector3<f64>) {
        debug!(order, qx = q.x, qy = q.y, qz = q.z, "wave vector");
        self.wave_vectors.insert(order, q);
    }

    /// The wave vector for harmonic order n: the explicit `W_n` if defined,
    /// otherwise `n * W_1`.
    ///
    /// # Errors
    ///
    /// Returns [`ModulationError::UndefinedWaveVector`] when neither exists;
    /// evaluating a wave with no matching wave vector is an error, never a
    /// guess.
    pub fn wave_vector(&self, order: u32) -> Result<Vector3<f64>, ModulationError> {
        if let Some(q) = self.wave_vectors.get(&order) {
            return Ok(*q);
        }
        if order > 1 {
            if let Some(q1) = self.wave_vectors.get(&1) {
                return Ok(q1 * f64::from(order));
            }
        }
        Err(ModulationError::UndefinedWaveVector { order })
    }

    /// Catalogs a wave. Zero-amplitude waves are stored as-is: existence is
    /// the entry itself, and rigid-body processing relies on it.
    ///
    /// # Errors
    ///
    /// Returns [`ModulationError::InvalidWaveForm`] for a payload that is
    /// meaningless for the key's kind (crenel outside occupancy, sawtooth
    /// outside displacement).
    pub fn add_wave(&mut self, key: WaveKey, form: WaveForm) -> Result<(), ModulationError> {
        let valid = match (&key.kind, &form) {
            (WaveKind::Occupancy, WaveForm::Fourier { .. } | WaveForm::Crenel { .. }) => true,
            (
                WaveKind::Displacement(_),
                WaveForm::Fourier { .. } | WaveForm::Legendre { .. } | WaveForm::Sawtooth { .. },
            ) => true,
            (WaveKind::Adp(_), WaveForm::Fourier { .. } | WaveForm::Legendre { .. }) => true,
            _ => false,
        };
        if !valid {
            return Err(ModulationError::InvalidWaveForm { key, form });
        }
        self.waves.insert(key, form);
        Ok(())
    }

    /// The cataloged payload for `key`, if any.
    pub fn wave(&self, key: &WaveKey) -> Option<&WaveForm> {
        self.waves.get(key)
    }

    /// All cataloged waves in deterministic key order.
    pub fn waves(&self) -> impl Iterator<Item = (&WaveKey, &WaveForm)> {
        self.waves.iter()
    }

    /// The waves belonging to one atom label.
    pub fn waves_for<'a>(
        &'a self,
        atom: &'a str,
    ) -> impl Iterator<Item = (&'a WaveKey, &'a WaveForm)> {
        self.waves.iter().filter(move |(key, _)| key.atom == atom)
    }

    /// True if any wave is cataloged for `atom`.
    pub fn has_waves(&self, atom: &str) -> bool {
        self.waves_for(atom).next().is_some()
    }

    /// Registers the Fourier occupancy baseline `o_0` for an atom
    /// (defaults to 1 when never set).
    pub fn set_occupancy_base(&mut self, atom: &str, o0: f64) {
        self.occupancy_base.insert(atom.to_string(), o0);
    }

    /// The Fourier occupancy baseline `o_0` for an atom.
    pub fn occupancy_base(&self, atom: &str) -> f64 {
        self.occupancy_base.get(atom).copied().unwrap_or(1.0)
    }

    pub(super) fn insert_wave_unchecked(&mut self, key: WaveKey, form: WaveForm) {
        self.waves.insert(key, form);
    }

    /// Evaluates every wave of `atom` at the internal phase `phase`.
    ///
    /// `site_occupancy` must already be scaled by site multiplicity (the
    /// source formats divide by multiplicity on write; the collection
    /// multiplies it back before calling here). Occupancy follows
    /// `o(t) = o_site * (o_0 + sum)` for Fourier waves, or
    /// `o(t) = o_site * window` for crenel waves; a sawtooth displacement
    /// outside its window gates the occupancy to zero as well. The final
    /// occupancy is clamped to [0, 1]. Legendre terms evaluate at the
    /// first-harmonic internal coordinate `q_1 . t` whatever their order.
    ///
    /// # Errors
    ///
    /// Returns [`ModulationError::UndefinedWaveVector`] if any wave's order
    /// has no matching wave vector.
    pub fn evaluate(
        &self,
        atom: &str,
        site_occupancy: f64,
        phase: &Vector3<f64>,
        axes: &AxisFilter,
    ) -> Result<Evaluation, ModulationError> {
        let mut occ_sum = 0.0;
        let mut occ_window: Option<f64> = None;
        let mut position_delta = Vector3::zeros();
        let mut adp_delta = [0.0; 6];

        for (key, form) in self.waves_for(atom) {
            // a Legendre order selects the polynomial, not a harmonic of q
            let q = match form {
                WaveForm::Legendre { .. } => self.wave_vector(1)?,
                _ => self.wave_vector(key.order)?,
            };
            let u = q.dot(phase);
            match key.kind {
                WaveKind::Occupancy => match form.evaluate(u, key.order) {
                    Contribution::Additive(v) => occ_sum += v,
                    Contribution::Absolute(gate) => {
                        occ_window = Some(occ_window.map_or(gate, |g: f64| g.min(gate)));
                    }
                },
                WaveKind::Displacement(axis) => {
                    if !axes.allows(axis) {
                        continue;
                    }
                    match form.evaluate(u, key.order) {
                        Contribution::Additive(v) => position_delta[axis.index()] += v,
                        Contribution::Absolute(gate) => {
                            // a windowed displacement outside its interval
                            // removes the atom at this phase
                            occ_window = Some(occ_window.map_or(gate, |g: f64| g.min(gate)));
                        }
                    }
                }
                WaveKind::Adp(component) => {
                    if let Contribution::Additive(v) = form.evaluate(u, key.order) {
                        adp_delta[component.index()] += v;
                    }
                }
            }
        }

        let occupancy = match occ_window {
            Some(gate) => site_occupancy * gate,
            None => site_occupancy * (self.occupancy_base(atom) + occ_sum),
        }
        .clamp(0.0, 1.0);

        Ok(Evaluation {
            occupancy,
            position_delta,
            adp_delta,
        })
    }
}

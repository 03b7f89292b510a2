use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;

/// Amplitudes below this threshold contribute exactly zero to an evaluation.
///
/// Wave *existence* is carried by the catalog entry itself, so a wave may be
/// stored with zero amplitude purely for rigid-body bookkeeping; this
/// threshold keeps such entries from leaking numeric noise into results.
pub const NEGLIGIBLE_AMPLITUDE: f64 = 1e-8;

/// A crystallographic axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// The `a` / `x` direction.
    X,
    /// The `b` / `y` direction.
    Y,
    /// The `c` / `z` direction.
    Z,
}

impl Axis {
    /// All three axes in component order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// The vector component index of this axis.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// One of the six independent anisotropic displacement tensor components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum AdpComponent {
    U11,
    U22,
    U33,
    U12,
    U13,
    U23,
}

impl AdpComponent {
    /// All six components in tensor storage order.
    pub const ALL: [AdpComponent; 6] = [
        AdpComponent::U11,
        AdpComponent::U22,
        AdpComponent::U33,
        AdpComponent::U12,
        AdpComponent::U13,
        AdpComponent::U23,
    ];

    /// The storage index of this component in an ADP six-tuple.
    pub fn index(self) -> usize {
        match self {
            AdpComponent::U11 => 0,
            AdpComponent::U22 => 1,
            AdpComponent::U33 => 2,
            AdpComponent::U12 => 3,
            AdpComponent::U13 => 4,
            AdpComponent::U23 => 5,
        }
    }
}

/// What physical quantity a modulation wave perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WaveKind {
    /// Site occupancy.
    Occupancy,
    /// Positional displacement along one axis.
    Displacement(Axis),
    /// One anisotropic displacement tensor component.
    Adp(AdpComponent),
}

/// Structured catalog key for a modulation wave: (kind, atom label, harmonic
/// order). The string-formatted keys of legacy formats are a display concern
/// only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WaveKey {
    /// What the wave perturbs.
    pub kind: WaveKind,
    /// The label of the atom the wave belongs to.
    pub atom: String,
    /// Harmonic order n (1-based).
    pub order: u32,
}

impl WaveKey {
    /// Convenience constructor.
    pub fn new(kind: WaveKind, atom: &str, order: u32) -> Self {
        Self {
            kind,
            atom: atom.to_string(),
            order,
        }
    }
}

impl fmt::Display for WaveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            WaveKind::Occupancy => "O".to_string(),
            WaveKind::Displacement(axis) => format!("D#{:?}", axis),
            WaveKind::Adp(c) => format!("U#{:?}", c),
        };
        write!(f, "{}_{};{}", tag, self.order, self.atom)
    }
}

/// The payload of one modulation wave.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WaveForm {
    /// A Fourier harmonic `sin * sin(2 pi q.t) + cos * cos(2 pi q.t)`.
    Fourier {
        /// Sine amplitude.
        sin: f64,
        /// Cosine amplitude.
        cos: f64,
    },
    /// A Legendre polynomial term `coeff * P_order(2u - 1)` on the folded
    /// internal coordinate u.
    Legendre {
        /// Polynomial coefficient.
        coeff: f64,
    },
    /// A crenel occupation window: 1 inside `[center - width/2,
    /// center + width/2]` (with wrap-around), 0 outside.
    Crenel {
        /// Window center in internal-coordinate units.
        center: f64,
        /// Window width.
        width: f64,
    },
    /// A sawtooth displacement ramp across a crenel-style window.
    Sawtooth {
        /// Window center.
        center: f64,
        /// Window width.
        width: f64,
        /// Maximum displacement at the window edge.
        amplitude: f64,
    },
}

impl WaveForm {
    /// True if every amplitude of this wave is below
    /// [`NEGLIGIBLE_AMPLITUDE`]; the wave still exists for bookkeeping.
    pub fn is_negligible(&self) -> bool {
        match *self {
            WaveForm::Fourier { sin, cos } => {
                sin.abs() < NEGLIGIBLE_AMPLITUDE && cos.abs() < NEGLIGIBLE_AMPLITUDE
            }
            WaveForm::Legendre { coeff } => coeff.abs() < NEGLIGIBLE_AMPLITUDE,
            WaveForm::Sawtooth { amplitude, .. } => amplitude.abs() < NEGLIGIBLE_AMPLITUDE,
            WaveForm::Crenel { .. } => false,
        }
    }
}

/// The value of a wave at folded internal coordinate `u` (in cycles).
///
/// Returns `Contribution::Additive` for series terms and
/// `Contribution::Absolute` for window functions that gate the whole
/// quantity (crenel) or produce a windowed value (sawtooth outside its
/// window contributes an absolute zero displacement and occupancy gate 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contribution {
    /// A value to be summed into the series.
    Additive(f64),
    /// An absolute value replacing the series (occupancy windows).
    Absolute(f64),
}

impl WaveForm {
    /// Evaluates the wave at internal coordinate `u` (cycles, unfolded).
    pub fn evaluate(&self, u: f64, order: u32) -> Contribution {
        match *self {
            WaveForm::Fourier { sin, cos } => {
                let theta = TAU * u;
                let mut v = 0.0;
                if sin.abs() >= NEGLIGIBLE_AMPLITUDE {
                    v += sin * theta.sin();
                }
                if cos.abs() >= NEGLIGIBLE_AMPLITUDE {
                    v += cos * theta.cos();
                }
                Contribution::Additive(v)
            }
            WaveForm::Legendre { coeff } => {
                if coeff.abs() < NEGLIGIBLE_AMPLITUDE {
                    return Contribution::Additive(0.0);
                }
                let folded = u - u.floor();
                Contribution::Additive(coeff * legendre(order, 2.0 * folded - 1.0))
            }
            WaveForm::Crenel { center, width } => {
                let folded = u - u.floor();
                Contribution::Absolute(if in_window(folded, center, width) {
                    1.0
                } else {
                    0.0
                })
            }
            WaveForm::Sawtooth { center, width, amplitude } => {
                let mut folded = u - u.floor();
                if !in_window(folded, center, width) {
                    return Contribution::Absolute(0.0);
                }
                let half = clamped_half_width(width);
                let (left, right) = window_edges(center, width);
                // unfold across the cell boundary so the ramp stays linear
                if left > right {
                    if folded < left && left < center {
                        folded += 1.0;
                    } else if folded > right && right > center {
                        folded -= 1.0;
                    }
                }
                Contribution::Additive(amplitude / half * (folded - center))
            }
        }
    }
}

fn clamped_half_width(width: f64) -> f64 {
    // some deposited structures carry widths > 1
    (width / 2.0).min(0.5)
}

fn window_edges(center: f64, width: f64) -> (f64, f64) {
    let half = clamped_half_width(width);
    let mut left = center - half;
    let mut right = center + half;
    if left < 0.0 {
        left += 1.0;
    }
    if right > 1.0 {
        right -= 1.0;
    }
    (left, right)
}

/// Window containment with wrap-around folding.
pub fn in_window(u: f64, center: f64, width: f64) -> bool {
    let (left, right) = window_edges(center, width);
    if left <= right {
        left <= u && u <= right
    } else {
        left <= u || u <= right
    }
}

/// The Legendre polynomial P_n evaluated at `x` via the Bonnet recurrence.
pub fn legendre(n: u32, x: f64) -> f64 {
    match n {
        0 => 1.0,
        1 => x,
        _ => {
            let (mut p_prev, mut p) = (1.0, x);
            for k in 2..=n {
                let kf = f64::from(k);
                let next = ((2.0 * kf - 1.0) * x * p - (kf - 1.0) * p_prev) / kf;
                p_prev = p;
                p = next;
            }
            p
        }
    }
}

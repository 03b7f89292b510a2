use nalgebra::{DMatrix, DVector, Matrix3};
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing Jones-faithful operator text.
#[derive(Debug, Error, PartialEq)]
pub enum OperatorParseError {
    /// The text has the wrong number of comma-separated components.
    #[error("expected {expected} components, found {found} in '{text}'")]
    ComponentCount {
        /// Components required for this dimensionality.
        expected: usize,
        /// Components present in the text.
        found: usize,
        /// The offending operator text.
        text: String,
    },
    /// A coordinate variable outside the operator's dimensionality.
    #[error("coordinate variable 'x{index}' exceeds dimension {dimension} in '{text}'")]
    VariableOutOfRange {
        /// One-based variable index as written.
        index: usize,
        /// The operator dimensionality.
        dimension: usize,
        /// The offending operator text.
        text: String,
    },
    /// A variable carried a coefficient other than +1 or -1.
    #[error("coefficient {coefficient} on a coordinate variable in '{text}'; only +/-1 is supported")]
    ScaledVariable {
        /// The rejected coefficient.
        coefficient: f64,
        /// The offending operator text.
        text: String,
    },
    /// A fraction with a zero denominator.
    #[error("zero denominator in '{text}'")]
    ZeroDenominator {
        /// The offending operator text.
        text: String,
    },
    /// A character the grammar does not recognize.
    #[error("unexpected character '{found}' in '{text}'")]
    UnexpectedCharacter {
        /// The rejected character.
        found: char,
        /// The offending operator text.
        text: String,
    },
}

/// An affine symmetry operator on an n-dimensional fractional coordinate,
/// n = 3 + modulation dimension, applied as `x' = R x + t`.
///
/// Operators are parsed from Jones-faithful notation such as
/// `-x+1/2,y,z+1/2` or, in superspace, `x1,-x2,x3+1/2,-x4`. Lattice
/// centerings are represented as translation-only operators, not as a
/// separate cell type.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetryOperator {
    rotation: DMatrix<f64>,
    translation: DVector<f64>,
}

impl SymmetryOperator {
    /// The identity operator in `3 + mod_dim` dimensions.
    pub fn identity(mod_dim: usize) -> Self {
        let n = 3 + mod_dim;
        Self {
            rotation: DMatrix::identity(n, n),
            translation: DVector::zeros(n),
        }
    }

    /// A pure translation operator (used for lattice centering).
    pub fn from_translation(translation: DVector<f64>) -> Self {
        let n = translation.len();
        Self {
            rotation: DMatrix::identity(n, n),
            translation,
        }
    }

    /// Parses Jones-faithful text into an operator of dimension `3 + mod_dim`.
    ///
    /// Grammar per component: a signed sum of coordinate variables with
    /// coefficient +/-1 (`x`, `y`, `z`, or `x1`..`x6`), plus an optional
    /// rational (`p/q`) or decimal constant. Whitespace is ignored. Unknown
    /// syntax is a parse error, never silently ignored.
    ///
    /// # Errors
    ///
    /// Returns an [`OperatorParseError`] describing the first offending
    /// construct.
    pub fn parse(text: &str, mod_dim: usize) -> Result<Self, OperatorParseError> {
        let n = 3 + mod_dim;
        let components: Vec<&str> = text.split(',').collect();
        if components.len() != n {
            return Err(OperatorParseError::ComponentCount {
                expected: n,
                found: components.len(),
                text: text.to_string(),
            });
        }
        let mut rotation = DMatrix::zeros(n, n);
        let mut translation = DVector::zeros(n);
        for (row, component) in components.iter().enumerate() {
            parse_component(component, text, n, row, &mut rotation, &mut translation)?;
        }
        Ok(Self { rotation, translation })
    }

    /// Applies the operator to a fractional coordinate.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate length does not match the operator dimension.
    pub fn apply(&self, coords: &DVector<f64>) -> DVector<f64> {
        &self.rotation * coords + &self.translation
    }

    /// The operator dimension, 3 + modulation dimension.
    pub fn dimension(&self) -> usize {
        self.translation.len()
    }

    /// The rotation/shift part R.
    pub fn rotation(&self) -> &DMatrix<f64> {
        &self.rotation
    }

    /// The translation part t.
    pub fn translation(&self) -> &DVector<f64> {
        &self.translation
    }

    /// The external block of R: the leading 3x3 acting on x, y, z.
    ///
    /// Direction-valued quantities attached to an image (modulation
    /// displacements, ADP tensors) transform by this block, not by the full
    /// superspace matrix.
    pub fn external_rotation(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|i, j| self.rotation[(i, j)])
    }

    /// True if this operator equals `other` within `tolerance`, comparing
    /// translations modulo 1.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        let rot_close = self
            .rotation
            .iter()
            .zip(other.rotation.iter())
            .all(|(a, b)| (a - b).abs() < tolerance);
        let trans_close = self
            .translation
            .iter()
            .zip(other.translation.iter())
            .all(|(a, b)| {
                let d = (a - b).rem_euclid(1.0);
                d < tolerance || (1.0 - d) < tolerance
            });
        rot_close && trans_close
    }

    /// The composition `self . other`, applying `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: &self.rotation * &other.rotation,
            translation: &self.rotation * &other.translation + &self.translation,
        }
    }
}

impl fmt::Display for SymmetryOperator {
    /// Re-emits canonical Jones-faithful text (`x,y,z` labels in three
    /// dimensions, `x1..xn` in superspace).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.dimension();
        for row in 0..n {
            if row > 0 {
                write!(f, ",")?;
            }
            let mut wrote = false;
            for col in 0..n {
                let v = self.rotation[(row, col)];
                if v.abs() < 1e-9 {
                    continue;
                }
                if v < 0.0 {
                    write!(f, "-")?;
                } else if wrote {
                    write!(f, "+")?;
                }
                write!(f, "{}", variable_label(col, n))?;
                wrote = true;
            }
            let t = self.translation[row];
            if t.abs() >= 1e-9 {
                if t > 0.0 && wrote {
                    write!(f, "+")?;
                }
                write_fraction(f, t)?;
                wrote = true;
            }
            if !wrote {
                write!(f, "0")?;
            }
        }
        Ok(())
    }
}

fn variable_label(index: usize, dimension: usize) -> String {
    if dimension == 3 {
        ["x", "y", "z"][index].to_string()
    } else {
        format!("x{}", index + 1)
    }
}

fn write_fraction(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    // twelfths cover every crystallographic translation
    let twelfths = value * 12.0;
    if (twelfths - twelfths.round()).abs() < 1e-6 {
        let num = twelfths.round() as i64;
        let gcd = gcd(num.unsigned_abs(), 12);
        write!(f, "{}/{}", num / gcd as i64, 12 / gcd)
    } else {
        write!(f, "{value}")
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// One term currently being accumulated by the component parser.
#[derive(Default)]
struct PendingTerm {
    negative: bool,
    numerator: Option<f64>,
    denominator: Option<f64>,
    in_denominator: bool,
    decimal_scale: Option<f64>,
}

impl PendingTerm {
    fn sign(&self) -> f64 {
        if self.negative { -1.0 } else { 1.0 }
    }

    fn push_digit(&mut self, d: u32) {
        let slot = if self.in_denominator {
            self.denominator.get_or_insert(0.0)
        } else {
            self.numerator.get_or_insert(0.0)
        };
        if let Some(scale) = self.decimal_scale.as_mut() {
            *slot += f64::from(d) * *scale;
            *scale /= 10.0;
        } else {
            *slot = *slot * 10.0 + f64::from(d);
        }
    }

    fn flush_constant(
        &mut self,
        text: &str,
        translation: &mut DVector<f64>,
        row: usize,
    ) -> Result<(), OperatorParseError> {
        if let Some(num) = self.numerator.take() {
            let den = match self.denominator.take() {
                Some(d) if d == 0.0 => {
                    return Err(OperatorParseError::ZeroDenominator { text: text.to_string() });
                }
                Some(d) => d,
                None => 1.0,
            };
            translation[row] += self.sign() * num / den;
        }
        self.negative = false;
        self.in_denominator = false;
        self.decimal_scale = None;
        Ok(())
    }
}

fn parse_component(
    component: &str,
    text: &str,
    dimension: usize,
    row: usize,
    rotation: &mut DMatrix<f64>,
    translation: &mut DVector<f64>,
) -> Result<(), OperatorParseError> {
    let mut term = PendingTerm::default();
    let mut chars = component.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' => {}
            '+' | '-' => {
                term.flush_constant(text, translation, row)?;
                term.negative = ch == '-';
            }
            '/' => {
                if term.numerator.is_none() {
                    return Err(OperatorParseError::UnexpectedCharacter {
                        found: '/',
                        text: text.to_string(),
                    });
                }
                term.in_denominator = true;
                term.decimal_scale = None;
            }
            '.' => {
                term.numerator.get_or_insert(0.0);
                term.decimal_scale = Some(0.1);
            }
            '0'..='9' => term.push_digit(ch.to_digit(10).expect("ascii digit")),
            'x' | 'y' | 'z' => {
                // a digit pending before a variable would be a scale factor
                if let Some(coefficient) = term.numerator.take() {
                    return Err(OperatorParseError::ScaledVariable {
                        coefficient: term.sign() * coefficient,
                        text: text.to_string(),
                    });
                }
                let column = match ch {
                    'y' => 1,
                    'z' => 2,
                    _ => {
                        // 'x' may be plain x or an indexed superspace variable
                        if let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                            chars.next();
                            let index = d as usize;
                            if index < 1 || index > dimension {
                                return Err(OperatorParseError::VariableOutOfRange {
                                    index,
                                    dimension,
                                    text: text.to_string(),
                                });
                            }
                            index - 1
                        } else {
                            0
                        }
                    }
                };
                rotation[(row, column)] += term.sign();
                term.negative = false;
            }
            other => {
                return Err(OperatorParseError::UnexpectedCharacter {
                    found: other,
                    text: text.to_string(),
                });
            }
        }
    }
    term.flush_constant(text, translation, row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(text: &str) -> SymmetryOperator {
        SymmetryOperator::parse(text, 0).unwrap()
    }

    #[test]
    fn identity_is_parsed() {
        let e = op("x,y,z");
        assert!(e.approx_eq(&SymmetryOperator::identity(0), 1e-9));
    }

    #[test]
    fn inversion_negates_coordinates() {
        let inv = op("-x,-y,-z");
        let image = inv.apply(&DVector::from_vec(vec![0.25, 0.25, 0.25]));
        assert!((image[0] + 0.25).abs() < 1e-12);
        assert!((image[1] + 0.25).abs() < 1e-12);
        assert!((image[2] + 0.25).abs() < 1e-12);
    }

    #[test]
    fn fractional_and_decimal_translations_agree() {
        let a = op("-x+1/2,y,z+1/2");
        let b = op("-x+0.5,y,z+0.5");
        assert!(a.approx_eq(&b, 1e-9));
        assert!((a.translation()[0] - 0.5).abs() < 1e-12);
        assert!((a.rotation()[(0, 0)] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn superspace_variables_are_accepted() {
        let g = SymmetryOperator::parse("-x1+1/2,-x2+1/2,x3+1/2,x4+1/2", 1).unwrap();
        assert_eq!(g.dimension(), 4);
        assert!((g.rotation()[(3, 3)] - 1.0).abs() < 1e-12);
        assert!((g.translation()[3] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mixed_terms_sum_per_component() {
        let g = op("x-y,x,z");
        assert!((g.rotation()[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((g.rotation()[(0, 1)] + 1.0).abs() < 1e-12);
        assert!((g.rotation()[(1, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn component_count_mismatch_is_an_error() {
        assert!(matches!(
            SymmetryOperator::parse("x,y", 0),
            Err(OperatorParseError::ComponentCount { expected: 3, found: 2, .. })
        ));
        assert!(matches!(
            SymmetryOperator::parse("x,y,z", 1),
            Err(OperatorParseError::ComponentCount { expected: 4, .. })
        ));
    }

    #[test]
    fn scaled_variables_are_rejected() {
        assert!(matches!(
            SymmetryOperator::parse("2x,y,z", 0),
            Err(OperatorParseError::ScaledVariable { .. })
        ));
    }

    #[test]
    fn junk_is_a_parse_error_not_ignored() {
        assert!(matches!(
            SymmetryOperator::parse("x,y,q", 0),
            Err(OperatorParseError::UnexpectedCharacter { found: 'q', .. })
        ));
        assert!(matches!(
            SymmetryOperator::parse("x,y,z+1/0", 0),
            Err(OperatorParseError::ZeroDenominator { .. })
        ));
    }

    #[test]
    fn variable_index_out_of_range_is_rejected() {
        assert!(matches!(
            SymmetryOperator::parse("x1,x2,x3,x5", 1),
            Err(OperatorParseError::VariableOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for text in ["x,y,z", "-x+1/2,y,z+1/2", "-x,-y,-z", "x-y,x,z+1/3"] {
            let g = op(text);
            let reparsed = op(&g.to_string());
            assert!(g.approx_eq(&reparsed, 1e-9), "round trip failed for {text}");
        }
    }

    #[test]
    fn external_rotation_is_the_leading_block() {
        let g = SymmetryOperator::parse("-x1,-x2,x3,-x4", 1).unwrap();
        let r = g.external_rotation();
        assert_eq!(
            r,
            Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0)
        );
    }

    #[test]
    fn compose_matches_sequential_application() {
        let g1 = op("-x,y+1/2,z");
        let g2 = op("x,-y,z+1/2");
        let p = DVector::from_vec(vec![0.1, 0.2, 0.3]);
        let composed = g1.compose(&g2).apply(&p);
        let sequential = g1.apply(&g2.apply(&p));
        assert!((composed - sequential).norm() < 1e-12);
    }
}

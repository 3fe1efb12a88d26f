//! # Evaluation Value Domain
//!
//! The closed set of runtime values a formula can produce, plus the
//! arithmetic rules over them (scalar/list broadcasting in entry context;
//! scalar-only in widget context).

use std::fmt;

use crate::entry::ResolvedEntry;
use crate::widget::loader::LoadedEntry;

/// Arithmetic operators of the DSL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    /// `//` floors the real quotient
    FloorDiv,
    Mod,
    /// `^` real-valued exponentiation; left-associative (documented caveat:
    /// mathematical convention is right-associative)
    Pow,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::FloorDiv => "//",
            ArithOp::Mod => "%",
            ArithOp::Pow => "^",
        }
    }

    /// Apply to two scalars. Division and modulo by zero are errors, not
    /// infinities.
    pub fn apply(self, a: f64, b: f64) -> Result<f64, String> {
        match self {
            ArithOp::Add => Ok(a + b),
            ArithOp::Sub => Ok(a - b),
            ArithOp::Mul => Ok(a * b),
            ArithOp::Div => {
                if b == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(a / b)
                }
            }
            ArithOp::FloorDiv => {
                if b == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok((a / b).floor())
                }
            }
            ArithOp::Mod => {
                if b == 0.0 {
                    Err("modulo by zero".to_string())
                } else {
                    Ok(a % b)
                }
            }
            ArithOp::Pow => Ok(a.powf(b)),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Runtime value of a formula expression.
///
/// Entry references borrow from the pipeline tree (or the loaded
/// collection in widget context); the engine never owns tree nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue<'a> {
    Null,
    Num(f64),
    Str(String),
    Bool(bool),
    NumList(Vec<f64>),
    StrList(Vec<String>),
    BoolList(Vec<bool>),
    Entry(&'a ResolvedEntry),
    Entries(Vec<&'a ResolvedEntry>),
    /// The widget dataset alias: "this collection"
    Collection(&'a [LoadedEntry]),
}

impl<'a> EvalValue<'a> {
    /// Kind name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            EvalValue::Null => "null",
            EvalValue::Num(_) => "number",
            EvalValue::Str(_) => "string",
            EvalValue::Bool(_) => "boolean",
            EvalValue::NumList(_) => "number list",
            EvalValue::StrList(_) => "string list",
            EvalValue::BoolList(_) => "boolean list",
            EvalValue::Entry(_) => "entry",
            EvalValue::Entries(_) => "entry list",
            EvalValue::Collection(_) => "collection",
        }
    }

    /// Whether the value is list- or collection-shaped
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            EvalValue::NumList(_)
                | EvalValue::StrList(_)
                | EvalValue::BoolList(_)
                | EvalValue::Entries(_)
                | EvalValue::Collection(_)
        )
    }

    /// Apply an arithmetic operator. `broadcast` enables scalar/list
    /// broadcasting (entry context); without it any list operand is
    /// rejected (widget context: aggregate first).
    pub fn arith(
        op: ArithOp,
        lhs: EvalValue<'a>,
        rhs: EvalValue<'a>,
        broadcast: bool,
    ) -> Result<EvalValue<'a>, String> {
        if !broadcast && (lhs.is_list() || rhs.is_list()) {
            return Err(format!(
                "arithmetic on collection-shaped operands ({} {} {}); aggregate with sum/avg/count first",
                lhs.kind(),
                op,
                rhs.kind()
            ));
        }
        match (lhs, rhs) {
            (EvalValue::Num(a), EvalValue::Num(b)) => Ok(EvalValue::Num(op.apply(a, b)?)),
            (EvalValue::Num(a), EvalValue::NumList(bs)) => Ok(EvalValue::NumList(
                bs.into_iter()
                    .map(|b| op.apply(a, b))
                    .collect::<Result<_, _>>()?,
            )),
            (EvalValue::NumList(xs), EvalValue::Num(b)) => Ok(EvalValue::NumList(
                xs.into_iter()
                    .map(|a| op.apply(a, b))
                    .collect::<Result<_, _>>()?,
            )),
            (EvalValue::NumList(xs), EvalValue::NumList(ys)) => {
                if xs.len() != ys.len() {
                    return Err(format!(
                        "list arithmetic requires equal lengths ({} vs {})",
                        xs.len(),
                        ys.len()
                    ));
                }
                Ok(EvalValue::NumList(
                    xs.into_iter()
                        .zip(ys)
                        .map(|(a, b)| op.apply(a, b))
                        .collect::<Result<_, _>>()?,
                ))
            }
            (lhs, rhs) => Err(format!(
                "cannot apply '{}' to {} and {}",
                op,
                lhs.kind(),
                rhs.kind()
            )),
        }
    }

    /// Unary negation (broadcasts over number lists in entry context)
    pub fn negate(self, broadcast: bool) -> Result<EvalValue<'a>, String> {
        match self {
            EvalValue::Num(n) => Ok(EvalValue::Num(-n)),
            EvalValue::NumList(ns) if broadcast => {
                Ok(EvalValue::NumList(ns.into_iter().map(|n| -n).collect()))
            }
            other => Err(format!("cannot negate {}", other.kind())),
        }
    }
}

/// An owned scalar: the result shape entry formulas must produce, and the
/// shape stored in the per-node `field_values` scratch map.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Num(f64),
    Str(String),
    Bool(bool),
}

impl Scalar {
    /// Convert an evaluation result into an owned scalar. `None` for null
    /// and list-shaped results.
    pub fn from_value(value: &EvalValue<'_>) -> Option<Scalar> {
        match value {
            EvalValue::Num(n) => Some(Scalar::Num(*n)),
            EvalValue::Str(s) => Some(Scalar::Str(s.clone())),
            EvalValue::Bool(b) => Some(Scalar::Bool(*b)),
            _ => None,
        }
    }

    /// View as an evaluation value (for scratch-map bindings)
    pub fn to_value<'a>(&self) -> EvalValue<'a> {
        match self {
            Scalar::Num(n) => EvalValue::Num(*n),
            Scalar::Str(s) => EvalValue::Str(s.clone()),
            Scalar::Bool(b) => EvalValue::Bool(*b),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Num(n) => write!(f, "{}", n),
            Scalar::Str(s) => write!(f, "{}", s),
            Scalar::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_scalar_arith() {
        let v = EvalValue::arith(ArithOp::Add, EvalValue::Num(2.0), EvalValue::Num(3.0), true)
            .unwrap();
        assert_eq!(v, EvalValue::Num(5.0));
    }

    #[test]
    fn scalar_list_broadcast() {
        let v = EvalValue::arith(
            ArithOp::Mul,
            EvalValue::Num(2.0),
            EvalValue::NumList(vec![1.0, 2.0, 3.0]),
            true,
        )
        .unwrap();
        assert_eq!(v, EvalValue::NumList(vec![2.0, 4.0, 6.0]));
    }

    #[test]
    fn list_list_requires_equal_length() {
        let err = EvalValue::arith(
            ArithOp::Add,
            EvalValue::NumList(vec![1.0]),
            EvalValue::NumList(vec![1.0, 2.0]),
            true,
        )
        .unwrap_err();
        assert!(err.contains("equal lengths"));
    }

    #[test]
    fn widget_mode_rejects_list_arithmetic() {
        let err = EvalValue::arith(
            ArithOp::Add,
            EvalValue::NumList(vec![1.0]),
            EvalValue::Num(1.0),
            false,
        )
        .unwrap_err();
        assert!(err.contains("aggregate"));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(ArithOp::Div.apply(1.0, 0.0).is_err());
        assert!(ArithOp::Mod.apply(1.0, 0.0).is_err());
        assert!(ArithOp::FloorDiv.apply(1.0, 0.0).is_err());
    }

    #[test]
    fn floor_div_floors_real_quotient() {
        assert_eq!(ArithOp::FloorDiv.apply(7.0, 2.0).unwrap(), 3.0);
        assert_eq!(ArithOp::FloorDiv.apply(-7.0, 2.0).unwrap(), -4.0);
    }

    #[test]
    fn pow_is_real_valued() {
        assert_eq!(ArithOp::Pow.apply(2.0, 0.5).unwrap(), 2.0_f64.sqrt());
    }
}

//! Where-expression AST and evaluation.
//!
//! The SQL layer compiles `WHERE` clauses into this tree. Comparisons
//! widen numerics to double precision; strings, bools and datetimes
//! compare natively; operator pairings with no defined semantics
//! evaluate to false rather than erroring.

use crate::error::{DBError, DataError};
use liminaldb_lib::schema::TableSchema;
use liminaldb_lib::value::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Eq => "=",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Value(Value),
    Column(String),
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Evaluates the expression as a predicate over one row.
    ///
    /// Anything that is not `Bool(true)` fails the filter.
    pub fn matches(&self, schema: &TableSchema, row: &[Value]) -> Result<bool, DBError> {
        Ok(matches!(self.eval(schema, row)?, Value::Bool(true)))
    }

    /// Evaluates the expression to a value.
    ///
    /// Unknown columns are data errors; unsupported pairings fold to
    /// `Bool(false)` for comparisons/logic and `Null` for arithmetic.
    pub fn eval(&self, schema: &TableSchema, row: &[Value]) -> Result<Value, DBError> {
        match self {
            Expr::Value(v) => Ok(v.clone()),
            Expr::Column(name) => {
                let (pos, _) = schema
                    .column(name)
                    .ok_or_else(|| DataError::UnknownColumn { column: name.clone() })?;
                Ok(row[pos].clone())
            }
            Expr::BinOp { op, lhs, rhs } => {
                let lhs = lhs.eval(schema, row)?;
                let rhs = rhs.eval(schema, row)?;
                Ok(apply(*op, &lhs, &rhs))
            }
        }
    }

    /// Constant-folds a literal-only expression (no column references).
    pub fn fold_const(&self) -> Option<Value> {
        match self {
            Expr::Value(v) => Some(v.clone()),
            Expr::Column(_) => None,
            Expr::BinOp { op, lhs, rhs } => {
                let lhs = lhs.fold_const()?;
                let rhs = rhs.fold_const()?;
                Some(apply(*op, &lhs, &rhs))
            }
        }
    }

    /// Collects `column = literal` equalities from the top-level AND
    /// conjunction, in either orientation, for index selection.
    pub fn equality_candidates(&self) -> Vec<(&str, Value)> {
        let mut out = Vec::new();
        self.collect_equalities(&mut out);
        out
    }

    fn collect_equalities<'a>(&'a self, out: &mut Vec<(&'a str, Value)>) {
        if let Expr::BinOp { op, lhs, rhs } = self {
            match op {
                BinOp::And => {
                    lhs.collect_equalities(out);
                    rhs.collect_equalities(out);
                }
                BinOp::Eq => {
                    let pair = match (&**lhs, &**rhs) {
                        (Expr::Column(name), other) => other.fold_const().map(|v| (name.as_str(), v)),
                        (other, Expr::Column(name)) => other.fold_const().map(|v| (name.as_str(), v)),
                        _ => None,
                    };
                    if let Some((name, value)) = pair {
                        if !value.is_null() {
                            out.push((name, value));
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn apply(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    if op.is_comparison() {
        return Value::Bool(compare(op, lhs, rhs));
    }
    match op {
        BinOp::And => Value::Bool(truthy(lhs) && truthy(rhs)),
        BinOp::Or => Value::Bool(truthy(lhs) || truthy(rhs)),
        _ => arithmetic(op, lhs, rhs),
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> bool {
    let Some(ordering) = lhs.compare(rhs) else {
        return false;
    };
    match op {
        BinOp::Eq => ordering == Ordering::Equal,
        BinOp::NotEq => ordering != Ordering::Equal,
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::LtEq => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::GtEq => ordering != Ordering::Less,
        _ => unreachable!("not a comparison"),
    }
}

/// Integer arithmetic stays integral except division; any float operand
/// widens the whole expression to double precision.
fn arithmetic(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    if let (Value::Int64(a), Value::Int64(b)) = (lhs, rhs) {
        return match op {
            BinOp::Add => Value::Int64(a.wrapping_add(*b)),
            BinOp::Sub => Value::Int64(a.wrapping_sub(*b)),
            BinOp::Mul => Value::Int64(a.wrapping_mul(*b)),
            BinOp::Div if *b != 0 => Value::Float64(*a as f64 / *b as f64),
            _ => Value::Null,
        };
    }
    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Value::Null;
    };
    match op {
        BinOp::Add => Value::Float64(a + b),
        BinOp::Sub => Value::Float64(a - b),
        BinOp::Mul => Value::Float64(a * b),
        BinOp::Div => Value::Float64(a / b),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liminaldb_lib::schema::ColumnDef;
    use liminaldb_lib::value::DataKind;

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("value", DataKind::Int64).primary_key(true),
                ColumnDef::new("name", DataKind::Str).with_len(10).nullable(true),
            ],
            vec![],
        )
        .unwrap()
    }

    fn lit(v: i64) -> Expr {
        Expr::Value(Value::Int64(v))
    }

    #[test]
    fn arithmetic_precedence_comes_from_the_tree() {
        // value = 2 + 3 * 4, parsed as 2 + (3 * 4)
        let expr = Expr::bin(
            BinOp::Eq,
            Expr::Column("value".into()),
            Expr::bin(BinOp::Add, lit(2), Expr::bin(BinOp::Mul, lit(3), lit(4))),
        );
        let schema = schema();
        assert!(expr.matches(&schema, &[Value::Int64(14), Value::Null]).unwrap());
        assert!(!expr.matches(&schema, &[Value::Int64(10), Value::Null]).unwrap());
    }

    #[test]
    fn unsupported_pairing_is_false() {
        let expr = Expr::bin(BinOp::Lt, Expr::Column("name".into()), lit(3));
        assert!(!expr.matches(&schema(), &[Value::Int64(1), Value::Str("a".into())]).unwrap());
    }

    #[test]
    fn null_never_matches() {
        let expr = Expr::bin(BinOp::Eq, Expr::Column("name".into()), Expr::Value(Value::Null));
        assert!(!expr.matches(&schema(), &[Value::Int64(1), Value::Null]).unwrap());
    }

    #[test]
    fn unknown_column_is_an_error() {
        let expr = Expr::bin(BinOp::Eq, Expr::Column("missing".into()), lit(1));
        assert!(matches!(
            expr.matches(&schema(), &[Value::Int64(1), Value::Null]),
            Err(DBError::Data(DataError::UnknownColumn { .. }))
        ));
    }

    #[test]
    fn equality_candidates_from_and_tree() {
        let expr = Expr::bin(
            BinOp::And,
            Expr::bin(BinOp::Eq, lit(5), Expr::Column("value".into())),
            Expr::bin(BinOp::Gt, Expr::Column("value".into()), lit(0)),
        );
        assert_eq!(expr.equality_candidates(), vec![("value", Value::Int64(5))]);
    }

    #[test]
    fn folded_literal_is_a_candidate() {
        let expr = Expr::bin(
            BinOp::Eq,
            Expr::Column("value".into()),
            Expr::bin(BinOp::Mul, lit(2), lit(3)),
        );
        assert_eq!(expr.equality_candidates(), vec![("value", Value::Int64(6))]);
    }

    #[test]
    fn or_branches_are_not_candidates() {
        let expr = Expr::bin(
            BinOp::Or,
            Expr::bin(BinOp::Eq, Expr::Column("value".into()), lit(1)),
            Expr::bin(BinOp::Eq, Expr::Column("value".into()), lit(2)),
        );
        assert!(expr.equality_candidates().is_empty());
    }
}

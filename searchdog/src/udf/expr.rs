//! Expression evaluator (spec.md §4.5.1): a small, branch-light interpreter
//! over [`searchdog_proto::expr_wire::Expr`]. Pure, typed, total over valid
//! inputs; a missing field evaluates to [`EValue::Null`], which propagates
//! through arithmetic and compares false (spec.md: "missing fields return a
//! defined 'null' that propagates through arithmetic and yields false
//! through comparisons").
//!
//! This is deliberately narrower than the UDF host API in [`super::sandbox`]
//! (spec.md §9, "a separate, narrower surface for expressions"): it only
//! ever sees a document field accessor, never capabilities, instance pools,
//! or logging.

use searchdog_proto::expr_wire::{BinOp, Expr, Func, Literal, UnOp};

/// The evaluator's own value representation. Distinct from
/// `searchdog_udf_sdk::Value` even though the shapes coincide, because this
/// type additionally participates in numeric coercion rules specific to
/// expression evaluation (e.g. `Int64 + Float64` promotes to `Float64`).
#[derive(Debug, Clone, PartialEq)]
pub enum EValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl EValue {
    fn is_truthy(&self) -> bool {
        matches!(self, EValue::Bool(true))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            EValue::Int64(i) => Some(*i as f64),
            EValue::Float64(f) => Some(*f),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, EValue::Int64(_) | EValue::Float64(_))
    }
}

/// Document field access, implemented per-collaborator: the data tier reads
/// from the index engine's document, a test harness reads from a
/// `serde_json::Value`.
pub trait FieldSource {
    fn field(&self, path: &str) -> EValue;
}

impl FieldSource for serde_json::Value {
    fn field(&self, path: &str) -> EValue {
        let mut cur = self;
        for segment in path.split('.') {
            match cur.get(segment) {
                Some(next) => cur = next,
                None => return EValue::Null,
            }
        }
        json_to_evalue(cur)
    }
}

fn json_to_evalue(v: &serde_json::Value) -> EValue {
    match v {
        serde_json::Value::Null => EValue::Null,
        serde_json::Value::Bool(b) => EValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EValue::Int64(i)
            } else {
                EValue::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => EValue::String(s.clone()),
        other => EValue::String(other.to_string()),
    }
}

/// Evaluate `expr` against `doc`. Total: every node variant has a defined
/// result for every input, including type-mismatched operands (they
/// evaluate to `Null`, which is falsy in boolean contexts).
pub fn eval(expr: &Expr, doc: &dyn FieldSource) -> EValue {
    match expr {
        Expr::Const(lit) => literal_to_evalue(lit),
        Expr::Field(path) => doc.field(path),
        Expr::UnOp { op, operand } => eval_unop(*op, eval(operand, doc)),
        Expr::BinOp { op, left, right } => eval_binop(*op, eval(left, doc), eval(right, doc)),
        Expr::Ternary {
            cond,
            if_true,
            if_false,
        } => {
            if eval(cond, doc).is_truthy() {
                eval(if_true, doc)
            } else {
                eval(if_false, doc)
            }
        }
        Expr::Call { func, args } => {
            let values: Vec<EValue> = args.iter().map(|a| eval(a, doc)).collect();
            eval_call(*func, &values)
        }
    }
}

/// Evaluate `expr` to a boolean predicate, the shape a query filter needs:
/// `Null` and any non-bool result is a non-match, matching spec.md's
/// "yields false through comparisons" for the filter-pushdown case.
pub fn eval_bool(expr: &Expr, doc: &dyn FieldSource) -> bool {
    matches!(eval(expr, doc), EValue::Bool(true))
}

fn literal_to_evalue(lit: &Literal) -> EValue {
    match lit {
        Literal::Null => EValue::Null,
        Literal::Bool(b) => EValue::Bool(*b),
        Literal::Int64(i) => EValue::Int64(*i),
        Literal::Float64(f) => EValue::Float64(*f),
        Literal::String(s) => EValue::String(s.clone()),
    }
}

fn eval_unop(op: UnOp, v: EValue) -> EValue {
    match (op, v) {
        (UnOp::Not, EValue::Bool(b)) => EValue::Bool(!b),
        (UnOp::Neg, EValue::Int64(i)) => EValue::Int64(-i),
        (UnOp::Neg, EValue::Float64(f)) => EValue::Float64(-f),
        _ => EValue::Null,
    }
}

fn eval_binop(op: BinOp, left: EValue, right: EValue) -> EValue {
    match op {
        BinOp::And => EValue::Bool(left.is_truthy() && right.is_truthy()),
        BinOp::Or => EValue::Bool(left.is_truthy() || right.is_truthy()),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => arith(op, &left, &right),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            EValue::Bool(compare(op, &left, &right))
        }
    }
}

fn arith(op: BinOp, left: &EValue, right: &EValue) -> EValue {
    if !left.is_numeric() || !right.is_numeric() {
        return EValue::Null;
    }
    if let (EValue::Int64(a), EValue::Int64(b)) = (left, right) {
        return match op {
            BinOp::Add => EValue::Int64(a.wrapping_add(*b)),
            BinOp::Sub => EValue::Int64(a.wrapping_sub(*b)),
            BinOp::Mul => EValue::Int64(a.wrapping_mul(*b)),
            BinOp::Div => {
                if *b == 0 {
                    EValue::Null
                } else {
                    EValue::Int64(a / b)
                }
            }
            _ => unreachable!(),
        };
    }
    let a = left.as_f64().unwrap_or(f64::NAN);
    let b = right.as_f64().unwrap_or(f64::NAN);
    match op {
        BinOp::Add => EValue::Float64(a + b),
        BinOp::Sub => EValue::Float64(a - b),
        BinOp::Mul => EValue::Float64(a * b),
        BinOp::Div => EValue::Float64(a / b),
        _ => unreachable!(),
    }
}

fn compare(op: BinOp, left: &EValue, right: &EValue) -> bool {
    // Null never compares equal/ordered to anything, including another
    // Null, per "missing fields ... yield false through comparisons".
    if matches!(left, EValue::Null) || matches!(right, EValue::Null) {
        return false;
    }
    let ordering = if left.is_numeric() && right.is_numeric() {
        left.as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&right.as_f64().unwrap_or(f64::NAN))
    } else if let (EValue::String(a), EValue::String(b)) = (left, right) {
        Some(a.cmp(b))
    } else if let (EValue::Bool(a), EValue::Bool(b)) = (left, right) {
        if op == BinOp::Eq {
            return a == b;
        } else if op == BinOp::Ne {
            return a != b;
        } else {
            return false;
        }
    } else {
        None
    };
    match (op, ordering) {
        (BinOp::Eq, Some(o)) => o == std::cmp::Ordering::Equal,
        (BinOp::Ne, Some(o)) => o != std::cmp::Ordering::Equal,
        (BinOp::Lt, Some(o)) => o == std::cmp::Ordering::Less,
        (BinOp::Le, Some(o)) => o != std::cmp::Ordering::Greater,
        (BinOp::Gt, Some(o)) => o == std::cmp::Ordering::Greater,
        (BinOp::Ge, Some(o)) => o != std::cmp::Ordering::Less,
        _ => false,
    }
}

fn eval_call(func: Func, args: &[EValue]) -> EValue {
    let nums: Vec<f64> = args.iter().filter_map(|v| v.as_f64()).collect();
    if nums.len() != args.len() {
        return EValue::Null;
    }
    match func {
        Func::Abs => nums.first().map(|n| EValue::Float64(n.abs())).unwrap_or(EValue::Null),
        Func::Sqrt => nums.first().map(|n| EValue::Float64(n.sqrt())).unwrap_or(EValue::Null),
        Func::Sin => nums.first().map(|n| EValue::Float64(n.sin())).unwrap_or(EValue::Null),
        Func::Cos => nums.first().map(|n| EValue::Float64(n.cos())).unwrap_or(EValue::Null),
        Func::Tan => nums.first().map(|n| EValue::Float64(n.tan())).unwrap_or(EValue::Null),
        Func::Min => nums
            .into_iter()
            .reduce(f64::min)
            .map(EValue::Float64)
            .unwrap_or(EValue::Null),
        Func::Max => nums
            .into_iter()
            .reduce(f64::max)
            .map(EValue::Float64)
            .unwrap_or(EValue::Null),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn field(path: &str) -> Box<Expr> {
        Box::new(Expr::Field(path.into()))
    }

    fn int(v: i64) -> Box<Expr> {
        Box::new(Expr::Const(Literal::Int64(v)))
    }

    #[test]
    fn test_range_and_matches_s2() {
        // (price >= 20) && (price <= 50), spec.md §8 S2.
        let expr = Expr::BinOp {
            op: BinOp::And,
            left: Box::new(Expr::BinOp {
                op: BinOp::Ge,
                left: field("price"),
                right: int(20),
            }),
            right: Box::new(Expr::BinOp {
                op: BinOp::Le,
                left: field("price"),
                right: int(50),
            }),
        };
        for price in [10, 20, 30, 50, 60] {
            let doc = json!({ "price": price });
            let expect = (20..=50).contains(&price);
            assert_eq!(eval_bool(&expr, &doc), expect, "price={price}");
        }
    }

    #[test]
    fn test_missing_field_is_null_and_falsy() {
        let expr = Expr::BinOp {
            op: BinOp::Gt,
            left: field("missing"),
            right: int(5),
        };
        let doc = json!({});
        assert!(!eval_bool(&expr, &doc));
        assert_eq!(eval(&expr.clone(), &doc), EValue::Bool(false));
    }

    #[test]
    fn test_null_propagates_through_arithmetic() {
        let expr = Expr::BinOp {
            op: BinOp::Add,
            left: field("missing"),
            right: int(1),
        };
        let doc = json!({});
        assert_eq!(eval(&expr, &doc), EValue::Null);
    }

    #[test]
    fn test_ternary_and_call() {
        let expr = Expr::Ternary {
            cond: Box::new(Expr::BinOp {
                op: BinOp::Lt,
                left: field("x"),
                right: int(0),
            }),
            if_true: Box::new(Expr::Call {
                func: Func::Abs,
                args: vec![Expr::Field("x".into())],
            }),
            if_false: Box::new(Expr::Field("x".into())),
        };
        assert_eq!(eval(&expr, &json!({"x": -5})), EValue::Float64(5.0));
        assert_eq!(eval(&expr, &json!({"x": 5})), EValue::Int64(5));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        let expr = Expr::BinOp {
            op: BinOp::Div,
            left: int(1),
            right: int(0),
        };
        let doc = json!({});
        assert_eq!(eval(&expr, &doc), EValue::Null);
    }
}

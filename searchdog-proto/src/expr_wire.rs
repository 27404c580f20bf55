//! The expression AST and its compact wire encoding (spec.md §4.5.1, §6.3).
//!
//! One byte tag identifies each node variant, followed by the variant's
//! payload; the whole tree parses in a single linear pass with no
//! back-references, typically 100-500 bytes encoded. Uses the same
//! `FromBytes`/`ToBytes`/`Protocol` split a wire-protocol codec would use
//! for a flat message list, adapted here to a tree instead.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("unexpected end of expression buffer")]
    UnexpectedEof,
    #[error("unknown expression tag {0:#04x}")]
    UnknownTag(u8),
    #[error("invalid utf-8 in expression string literal")]
    InvalidUtf8,
}

pub trait ToWire {
    fn to_wire(&self, out: &mut BytesMut);
}

pub trait FromWire: Sized {
    fn from_wire(buf: &mut Bytes) -> Result<Self, WireError>;
}

/// A literal value embedded directly in the AST (spec.md §4.5.1 "Types").
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// The fixed function library (spec.md §4.5.1 "function call (abs, sqrt,
/// min, max, basic trig, and a fixed library)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Sqrt,
    Min,
    Max,
    Sin,
    Cos,
    Tan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Literal),
    Field(String),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnOp {
        op: UnOp,
        operand: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

// Tags. Grouped by category with gaps for readability; values are stable
// wire constants, never renumbered once shipped.
mod tag {
    pub const CONST_NULL: u8 = 0x01;
    pub const CONST_BOOL: u8 = 0x02;
    pub const CONST_INT64: u8 = 0x03;
    pub const CONST_FLOAT64: u8 = 0x04;
    pub const CONST_STRING: u8 = 0x05;
    pub const FIELD: u8 = 0x10;
    pub const BINOP: u8 = 0x20;
    pub const UNOP: u8 = 0x21;
    pub const TERNARY: u8 = 0x22;
    pub const CALL: u8 = 0x23;
}

fn binop_code(op: BinOp) -> u8 {
    match op {
        BinOp::Add => 0,
        BinOp::Sub => 1,
        BinOp::Mul => 2,
        BinOp::Div => 3,
        BinOp::Eq => 4,
        BinOp::Ne => 5,
        BinOp::Lt => 6,
        BinOp::Le => 7,
        BinOp::Gt => 8,
        BinOp::Ge => 9,
        BinOp::And => 10,
        BinOp::Or => 11,
    }
}

fn binop_from_code(code: u8) -> Result<BinOp, WireError> {
    Ok(match code {
        0 => BinOp::Add,
        1 => BinOp::Sub,
        2 => BinOp::Mul,
        3 => BinOp::Div,
        4 => BinOp::Eq,
        5 => BinOp::Ne,
        6 => BinOp::Lt,
        7 => BinOp::Le,
        8 => BinOp::Gt,
        9 => BinOp::Ge,
        10 => BinOp::And,
        11 => BinOp::Or,
        other => return Err(WireError::UnknownTag(other)),
    })
}

fn unop_code(op: UnOp) -> u8 {
    match op {
        UnOp::Neg => 0,
        UnOp::Not => 1,
    }
}

fn unop_from_code(code: u8) -> Result<UnOp, WireError> {
    Ok(match code {
        0 => UnOp::Neg,
        1 => UnOp::Not,
        other => return Err(WireError::UnknownTag(other)),
    })
}

fn func_code(func: Func) -> u8 {
    match func {
        Func::Abs => 0,
        Func::Sqrt => 1,
        Func::Min => 2,
        Func::Max => 3,
        Func::Sin => 4,
        Func::Cos => 5,
        Func::Tan => 6,
    }
}

fn func_from_code(code: u8) -> Result<Func, WireError> {
    Ok(match code {
        0 => Func::Abs,
        1 => Func::Sqrt,
        2 => Func::Min,
        3 => Func::Max,
        4 => Func::Sin,
        5 => Func::Cos,
        6 => Func::Tan,
        other => return Err(WireError::UnknownTag(other)),
    })
}

fn put_string(out: &mut BytesMut, s: &str) {
    out.put_u32(s.len() as u32);
    out.put_slice(s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::UnexpectedEof);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(WireError::UnexpectedEof);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

impl ToWire for Expr {
    fn to_wire(&self, out: &mut BytesMut) {
        match self {
            Expr::Const(Literal::Null) => out.put_u8(tag::CONST_NULL),
            Expr::Const(Literal::Bool(b)) => {
                out.put_u8(tag::CONST_BOOL);
                out.put_u8(*b as u8);
            }
            Expr::Const(Literal::Int64(i)) => {
                out.put_u8(tag::CONST_INT64);
                out.put_i64(*i);
            }
            Expr::Const(Literal::Float64(f)) => {
                out.put_u8(tag::CONST_FLOAT64);
                out.put_f64(*f);
            }
            Expr::Const(Literal::String(s)) => {
                out.put_u8(tag::CONST_STRING);
                put_string(out, s);
            }
            Expr::Field(path) => {
                out.put_u8(tag::FIELD);
                put_string(out, path);
            }
            Expr::BinOp { op, left, right } => {
                out.put_u8(tag::BINOP);
                out.put_u8(binop_code(*op));
                left.to_wire(out);
                right.to_wire(out);
            }
            Expr::UnOp { op, operand } => {
                out.put_u8(tag::UNOP);
                out.put_u8(unop_code(*op));
                operand.to_wire(out);
            }
            Expr::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                out.put_u8(tag::TERNARY);
                cond.to_wire(out);
                if_true.to_wire(out);
                if_false.to_wire(out);
            }
            Expr::Call { func, args } => {
                out.put_u8(tag::CALL);
                out.put_u8(func_code(*func));
                out.put_u8(args.len() as u8);
                for arg in args {
                    arg.to_wire(out);
                }
            }
        }
    }
}

impl FromWire for Expr {
    fn from_wire(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 1 {
            return Err(WireError::UnexpectedEof);
        }
        let t = buf.get_u8();
        Ok(match t {
            tag::CONST_NULL => Expr::Const(Literal::Null),
            tag::CONST_BOOL => {
                if buf.remaining() < 1 {
                    return Err(WireError::UnexpectedEof);
                }
                Expr::Const(Literal::Bool(buf.get_u8() != 0))
            }
            tag::CONST_INT64 => {
                if buf.remaining() < 8 {
                    return Err(WireError::UnexpectedEof);
                }
                Expr::Const(Literal::Int64(buf.get_i64()))
            }
            tag::CONST_FLOAT64 => {
                if buf.remaining() < 8 {
                    return Err(WireError::UnexpectedEof);
                }
                Expr::Const(Literal::Float64(buf.get_f64()))
            }
            tag::CONST_STRING => Expr::Const(Literal::String(get_string(buf)?)),
            tag::FIELD => Expr::Field(get_string(buf)?),
            tag::BINOP => {
                if buf.remaining() < 1 {
                    return Err(WireError::UnexpectedEof);
                }
                let op = binop_from_code(buf.get_u8())?;
                let left = Box::new(Expr::from_wire(buf)?);
                let right = Box::new(Expr::from_wire(buf)?);
                Expr::BinOp { op, left, right }
            }
            tag::UNOP => {
                if buf.remaining() < 1 {
                    return Err(WireError::UnexpectedEof);
                }
                let op = unop_from_code(buf.get_u8())?;
                let operand = Box::new(Expr::from_wire(buf)?);
                Expr::UnOp { op, operand }
            }
            tag::TERNARY => {
                let cond = Box::new(Expr::from_wire(buf)?);
                let if_true = Box::new(Expr::from_wire(buf)?);
                let if_false = Box::new(Expr::from_wire(buf)?);
                Expr::Ternary {
                    cond,
                    if_true,
                    if_false,
                }
            }
            tag::CALL => {
                if buf.remaining() < 2 {
                    return Err(WireError::UnexpectedEof);
                }
                let func = func_from_code(buf.get_u8())?;
                let argc = buf.get_u8();
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    args.push(Expr::from_wire(buf)?);
                }
                Expr::Call { func, args }
            }
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

impl Expr {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.to_wire(&mut out);
        out.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, WireError> {
        Expr::from_wire(&mut bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip_range_and() {
        let expr = Expr::BinOp {
            op: BinOp::And,
            left: Box::new(Expr::BinOp {
                op: BinOp::Ge,
                left: Box::new(Expr::Field("price".into())),
                right: Box::new(Expr::Const(Literal::Int64(20))),
            }),
            right: Box::new(Expr::BinOp {
                op: BinOp::Le,
                left: Box::new(Expr::Field("price".into())),
                right: Box::new(Expr::Const(Literal::Int64(50))),
            }),
        };
        let encoded = expr.encode();
        assert!(encoded.len() < 500);
        let decoded = Expr::decode(encoded).unwrap();
        assert_eq!(expr, decoded);
    }

    #[test]
    fn test_round_trip_call_and_ternary() {
        let expr = Expr::Ternary {
            cond: Box::new(Expr::UnOp {
                op: UnOp::Not,
                operand: Box::new(Expr::Field("flagged".into())),
            }),
            if_true: Box::new(Expr::Call {
                func: Func::Sqrt,
                args: vec![Expr::Field("variance".into())],
            }),
            if_false: Box::new(Expr::Const(Literal::Float64(0.0))),
        };
        let decoded = Expr::decode(expr.encode()).unwrap();
        assert_eq!(expr, decoded);
    }

    #[test]
    fn test_truncated_buffer_errors() {
        let expr = Expr::Field("price".into());
        let mut encoded = expr.encode();
        encoded.truncate(encoded.len() - 2);
        assert!(Expr::decode(encoded).is_err());
    }
}

use crate::error::{Result, StorageError};

pub const MAX_KEY_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int = 0,
    Real = 1,
    VarChar = 2,
}

impl AttrType {
    pub fn from_u8(val: u8) -> Result<Self> {
        match val {
            0 => Ok(AttrType::Int),
            1 => Ok(AttrType::Real),
            2 => Ok(AttrType::VarChar),
            other => Err(StorageError::AttributeInvalidType(other)),
        }
    }
}

/// Describes one field of a tuple: its name, wire type and (for VarChar) the
/// maximum length it was declared with.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    pub length: u32,
}

/// A decoded attribute value, as produced by reading a tuple's wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Real(f32),
    VarChar(String),
}

impl Value {
    /// Size of this value's on-disk wire representation, matching the layout
    /// used for tuple fields and index keys alike: fixed 4 bytes for Int/Real,
    /// 4-byte length prefix plus payload for VarChar.
    pub fn wire_size(&self) -> usize {
        match self {
            Value::Int(_) => 4,
            Value::Real(_) => 4,
            Value::VarChar(s) => 4 + s.len(),
        }
    }

    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Int(_) => AttrType::Int,
            Value::Real(_) => AttrType::Real,
            Value::VarChar(_) => AttrType::VarChar,
        }
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => v.to_le_bytes().to_vec(),
            Value::Real(v) => v.to_le_bytes().to_vec(),
            Value::VarChar(s) => {
                let mut buf = Vec::with_capacity(4 + s.len());
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
                buf
            }
        }
    }

    /// Reads one value of `attr_type` from the front of `bytes`, returning the
    /// value and the number of bytes consumed.
    pub fn from_le_bytes(attr_type: AttrType, bytes: &[u8]) -> Result<(Self, usize)> {
        match attr_type {
            AttrType::Int => {
                if bytes.len() < 4 {
                    return Err(StorageError::RecordSizeInvalid(bytes.len()));
                }
                let v = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
                Ok((Value::Int(v), 4))
            }
            AttrType::Real => {
                if bytes.len() < 4 {
                    return Err(StorageError::RecordSizeInvalid(bytes.len()));
                }
                let v = f32::from_le_bytes(bytes[0..4].try_into().unwrap());
                Ok((Value::Real(v), 4))
            }
            AttrType::VarChar => {
                if bytes.len() < 4 {
                    return Err(StorageError::RecordSizeInvalid(bytes.len()));
                }
                let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
                if bytes.len() < 4 + len {
                    return Err(StorageError::RecordSizeInvalid(bytes.len()));
                }
                let s = String::from_utf8_lossy(&bytes[4..4 + len]).into_owned();
                Ok((Value::VarChar(s), 4 + len))
            }
        }
    }

    /// Total order used by the B+ tree: numeric natural order for Int/Real,
    /// lexicographic comparison over the shorter of the two byte lengths for
    /// VarChar (a shorter value that is a prefix of a longer one sorts first).
    pub fn compare(&self, other: &Value) -> std::cmp::Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
            (Value::VarChar(a), Value::VarChar(b)) => {
                let n = a.len().min(b.len());
                match a.as_bytes()[..n].cmp(&b.as_bytes()[..n]) {
                    std::cmp::Ordering::Equal => a.len().cmp(&b.len()),
                    other => other,
                }
            }
            _ => panic!("compared values of different attribute types"),
        }
    }
}

/// Filter operator for scan predicates. `NoOp` means "no condition" — every
/// record passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    NoOp,
}

impl CompOp {
    pub fn matches(&self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering::*;
        let ord = lhs.compare(rhs);
        match self {
            CompOp::Eq => ord == Equal,
            CompOp::Lt => ord == Less,
            CompOp::Gt => ord == Greater,
            CompOp::Le => ord != Greater,
            CompOp::Ge => ord != Less,
            CompOp::Ne => ord != Equal,
            CompOp::NoOp => true,
        }
    }
}

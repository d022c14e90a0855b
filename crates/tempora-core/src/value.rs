//! Dynamic values carried by leaf signals
//!
//! Compiled links are type-erased: the compiler tracks leaf types through
//! [`Shape`](crate::Shape), while the running network moves `Value`s.

use crate::signal::Record;
use crate::time::Time;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic value held by an active signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Unit-like value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value (also used to name behaviors for dynamic installation)
    String(String),
    /// Synchronized pair produced by zipping a product
    Pair(Box<Value>, Box<Value>),
    /// List of values
    List(Vec<Value>),
}

impl Value {
    /// Build a pair value
    pub fn pair(left: impl Into<Value>, right: impl Into<Value>) -> Self {
        Value::Pair(Box::new(left.into()), Box::new(right.into()))
    }

    /// Try to get this value as an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to split this value into its pair components
    pub fn as_pair(&self) -> Option<(&Value, &Value)> {
        match self {
            Value::Pair(l, r) => Some((l, r)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Pair(l, r) => write!(f, "({}, {})", l, r),
            Value::List(list) => {
                write!(f, "[")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Record<Value> {
    /// Record activation with anything convertible into a [`Value`]
    pub fn of(time: Time, value: impl Into<Value>) -> Self {
        Record::active(time, value.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((a, b): (A, B)) -> Self {
        Value::pair(a, b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(vec: Vec<T>) -> Self {
        Value::List(vec.into_iter().map(Into::into).collect())
    }
}

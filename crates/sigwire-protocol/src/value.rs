//! Typed argument values.
//!
//! A message carries an ordered list of [`Value`]s. Each variant has a
//! one-character type code, and the concatenation of those codes is the
//! message's signature (`"ssfff"` for a signal-created notification).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::NIL;

/// One message argument.
///
/// This is a tagged sum type: the variant *is* the type tag, so a value
/// and its type code can never disagree.
///
/// The `#[serde(tag = "type", content = "value")]` attribute makes the
/// JSON form `{"type":"Float","value":0.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// 32-bit signed integer (`i`).
    Int(i32),
    /// 32-bit float (`f`).
    Float(f32),
    /// 64-bit float (`d`).
    Double(f64),
    /// String (`s`).
    Str(String),
    /// Transport null (`N`). Carries no payload.
    Nil,
    /// 64-bit signed integer (`h`).
    Long(i64),
    /// Boolean (`T` or `F`). Carries no payload on the wire.
    Bool(bool),
    /// Opaque bytes (`b`).
    Blob(Vec<u8>),
    /// NTP timetag (`t`): seconds in the high 32 bits, fraction in the low.
    Time(u64),
    /// One ASCII character (`c`).
    Char(char),
    /// Infinitum (`I`). Carries no payload.
    Inf,
}

impl Value {
    /// The one-character type code for this value.
    pub fn type_tag(&self) -> char {
        match self {
            Self::Int(_) => 'i',
            Self::Float(_) => 'f',
            Self::Double(_) => 'd',
            Self::Str(_) => 's',
            Self::Nil => 'N',
            Self::Long(_) => 'h',
            Self::Bool(true) => 'T',
            Self::Bool(false) => 'F',
            Self::Blob(_) => 'b',
            Self::Time(_) => 't',
            Self::Char(_) => 'c',
            Self::Inf => 'I',
        }
    }

    /// Builds a string value, mapping the `-` sentinel to [`Value::Nil`].
    pub fn nullable_str(s: impl Into<String>) -> Self {
        let s = s.into();
        if s == NIL { Self::Nil } else { Self::Str(s) }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Renders the value as text for logging and broadcast hooks.
    /// Strings are returned as-is, numbers in their shortest form.
    pub fn to_text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Nil => NIL.to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Nil => f.write_str("nil"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Time(t) => write!(f, "{}.{:08x}", t >> 32, t & 0xffff_ffff),
            Self::Char(c) => write!(f, "{c:?}"),
            Self::Inf => f.write_str("inf"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Str(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Nil)
    }
}

// ---------------------------------------------------------------------------
// IntoArgs
// ---------------------------------------------------------------------------

/// Anything that can become an ordered argument list.
///
/// Implemented for `()`, for tuples of up to eight `Into<Value>` items,
/// and for `Vec<Value>`. This lets one generic `send` cover every fixed
/// shape the protocol uses:
///
/// ```
/// use sigwire_protocol::{IntoArgs, Value};
///
/// let args = ("/signal/list", "gain", "out", 0.0_f32, 1.0_f32, 0.5_f32).into_args();
/// assert_eq!(args.len(), 6);
/// assert_eq!(args[3], Value::Float(0.0));
/// assert!(().into_args().is_empty());
/// ```
pub trait IntoArgs {
    fn into_args(self) -> Vec<Value>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Value> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Vec<Value> {
        self
    }
}

impl IntoArgs for &[Value] {
    fn into_args(self) -> Vec<Value> {
        self.to_vec()
    }
}

macro_rules! impl_into_args {
    ($($name:ident),+) => {
        impl<$($name: Into<Value>),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<Value> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);
impl_into_args!(A, B, C, D, E);
impl_into_args!(A, B, C, D, E, F);
impl_into_args!(A, B, C, D, E, F, G);
impl_into_args!(A, B, C, D, E, F, G, H);

/// Concatenates the type codes of `values`.
pub fn signature_of(values: &[Value]) -> String {
    values.iter().map(Value::type_tag).collect()
}

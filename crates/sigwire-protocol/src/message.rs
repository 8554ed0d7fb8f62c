//! The [`Message`] type: an address plus typed arguments.

use serde::{Deserialize, Serialize};

use crate::value::signature_of;
use crate::{IntoArgs, NIL, ProtocolError, Tag, Value};

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The `/`-delimited address, e.g. `/signal/hello`.
    pub address: String,
    /// Arguments in wire order.
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: impl IntoArgs) -> Self {
        Self {
            address: address.into(),
            args: args.into_args(),
        }
    }

    /// A message with no arguments.
    pub fn flag(address: impl Into<String>) -> Self {
        Self::new(address, ())
    }

    /// Builds a message for a registered tag.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnknownTag`] for [`Tag::Illegal`] and
    /// [`ProtocolError::SignatureMismatch`] when the arguments don't fit
    /// the tag's fixed signature.
    pub fn for_tag(tag: Tag, args: impl IntoArgs) -> Result<Self, ProtocolError> {
        let spec = tag.spec().ok_or(ProtocolError::UnknownTag)?;
        let msg = Self::new(spec.address, args);
        let types = msg.signature();
        if !spec.signature.accepts(&types) {
            return Err(ProtocolError::SignatureMismatch {
                address: spec.address.to_string(),
                expected: spec.signature.to_string(),
                found: types,
            });
        }
        Ok(msg)
    }

    /// The concatenated type codes. Empty for a flag message.
    pub fn signature(&self) -> String {
        signature_of(&self.args)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Returns true if `self.address` begins with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.address.starts_with(prefix)
    }

    fn arg(&self, index: usize) -> Result<&Value, ProtocolError> {
        self.args
            .get(index)
            .ok_or(ProtocolError::MissingArg { index, len: self.args.len() })
    }

    fn mismatch(&self, index: usize, expected: char, found: &Value) -> ProtocolError {
        ProtocolError::ArgType {
            index,
            expected,
            found: found.type_tag(),
        }
    }

    /// The string at `index`.
    ///
    /// # Errors
    /// [`ProtocolError::MissingArg`] if out of range,
    /// [`ProtocolError::ArgType`] if the argument isn't a string.
    pub fn arg_str(&self, index: usize) -> Result<&str, ProtocolError> {
        let v = self.arg(index)?;
        v.as_str().ok_or_else(|| self.mismatch(index, 's', v))
    }

    /// Like [`Message::arg_str`], but `Nil` and the `-` sentinel yield
    /// `None`.
    pub fn arg_nullable_str(&self, index: usize) -> Result<Option<&str>, ProtocolError> {
        match self.arg(index)? {
            Value::Nil => Ok(None),
            Value::Str(s) if s == NIL => Ok(None),
            Value::Str(s) => Ok(Some(s)),
            other => Err(self.mismatch(index, 's', other)),
        }
    }

    pub fn arg_i32(&self, index: usize) -> Result<i32, ProtocolError> {
        let v = self.arg(index)?;
        v.as_i32().ok_or_else(|| self.mismatch(index, 'i', v))
    }

    pub fn arg_f32(&self, index: usize) -> Result<f32, ProtocolError> {
        let v = self.arg(index)?;
        v.as_f32().ok_or_else(|| self.mismatch(index, 'f', v))
    }

    pub fn arg_f64(&self, index: usize) -> Result<f64, ProtocolError> {
        let v = self.arg(index)?;
        v.as_f64().ok_or_else(|| self.mismatch(index, 'd', v))
    }

    /// Every argument rendered as text, for broadcast handlers.
    pub fn args_as_text(&self) -> Vec<String> {
        self.args.iter().map(Value::to_text).collect()
    }
}

//! Typed accessors over `serde_json::Value`.
//!
//! The wire model is plain `serde_json::Value`; this module adds the
//! fail-fast member accessors used where bodies are walked by hand
//! (reverse-request arguments, capability extraction, event bodies).
//! Pointer lookup comes from [`serde_json::Value::pointer`].

use serde_json::{Map, Value};

use crate::error::DapError;

/// Accessor extensions for [`serde_json::Value`].
pub trait JsonValueExt {
    /// Observe this value as an integer.
    ///
    /// Succeeds for JSON integers, and for floats that represent an exact
    /// integer in `i64` range. `1.0` is an integer; `1.5`, `NaN` and
    /// out-of-range floats are not.
    fn exact_int(&self) -> Option<i64>;

    /// Member lookup on an object value. `None` for non-objects.
    fn member(&self, name: &str) -> Option<&Value>;

    /// String member lookup. `None` when absent or not a string.
    fn str_member(&self, name: &str) -> Option<&str>;

    /// Integer member lookup via [`exact_int`](JsonValueExt::exact_int).
    fn int_member(&self, name: &str) -> Option<i64>;

    /// Boolean member lookup.
    fn bool_member(&self, name: &str) -> Option<bool>;

    /// Required string member; absent or mistyped fails with
    /// [`DapError::InvalidMessage`].
    fn require_str(&self, name: &str) -> Result<&str, DapError>;

    /// Required array member.
    fn require_array(&self, name: &str) -> Result<&Vec<Value>, DapError>;

    /// Required object member.
    fn require_object(&self, name: &str) -> Result<&Map<String, Value>, DapError>;
}

impl JsonValueExt for Value {
    fn exact_int(&self) -> Option<i64> {
        let number = self.as_number()?;
        if let Some(int) = number.as_i64() {
            return Some(int);
        }
        let float = number.as_f64()?;
        if float.is_finite()
            && float.fract() == 0.0
            && float >= i64::MIN as f64
            && float < i64::MAX as f64
        {
            Some(float as i64)
        } else {
            None
        }
    }

    fn member(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|obj| obj.get(name))
    }

    fn str_member(&self, name: &str) -> Option<&str> {
        self.member(name).and_then(Value::as_str)
    }

    fn int_member(&self, name: &str) -> Option<i64> {
        self.member(name).and_then(Value::exact_int)
    }

    fn bool_member(&self, name: &str) -> Option<bool> {
        self.member(name).and_then(Value::as_bool)
    }

    fn require_str(&self, name: &str) -> Result<&str, DapError> {
        self.str_member(name)
            .ok_or_else(|| DapError::InvalidMessage(format!("missing string field '{name}'")))
    }

    fn require_array(&self, name: &str) -> Result<&Vec<Value>, DapError> {
        self.member(name)
            .and_then(Value::as_array)
            .ok_or_else(|| DapError::InvalidMessage(format!("missing array field '{name}'")))
    }

    fn require_object(&self, name: &str) -> Result<&Map<String, Value>, DapError> {
        self.member(name)
            .and_then(Value::as_object)
            .ok_or_else(|| DapError::InvalidMessage(format!("missing object field '{name}'")))
    }
}

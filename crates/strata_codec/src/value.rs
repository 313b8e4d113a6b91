//! Dynamic value type stored by strata.

/// A binary payload with an associated content type.
///
/// The content type travels with the bytes through every backend, including
/// the text-only ones, so a stored `audio/mpeg` blob reads back as one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// MIME content type, e.g. `application/octet-stream`.
    pub content_type: String,
    /// The raw payload.
    pub bytes: Vec<u8>,
}

impl Blob {
    /// Creates a blob from a content type and bytes.
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// A value stored under a key.
///
/// Anything JSON-representable is carried as [`Value::Json`]. The remaining
/// variants are the binary kinds, which round-trip byte exactly through
/// every backend, including the text-only ones, via the serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A JSON value (null, bool, number, string, array, object).
    Json(serde_json::Value),
    /// An untyped byte buffer.
    Buffer(Vec<u8>),
    /// Signed 8-bit elements.
    Int8(Vec<i8>),
    /// Unsigned 8-bit elements.
    Uint8(Vec<u8>),
    /// Unsigned 8-bit elements with clamped-conversion semantics.
    ///
    /// Distinguished from [`Value::Uint8`] only by its type code; the
    /// distinction is preserved so a stored value reads back as the exact
    /// kind it was written as.
    Uint8Clamped(Vec<u8>),
    /// Signed 16-bit elements.
    Int16(Vec<i16>),
    /// Unsigned 16-bit elements.
    Uint16(Vec<u16>),
    /// Signed 32-bit elements.
    Int32(Vec<i32>),
    /// Unsigned 32-bit elements.
    Uint32(Vec<u32>),
    /// 32-bit float elements.
    Float32(Vec<f32>),
    /// 64-bit float elements.
    Float64(Vec<f64>),
    /// A byte payload with a content type.
    Blob(Blob),
}

impl Value {
    /// A JSON null.
    #[must_use]
    pub const fn null() -> Self {
        Self::Json(serde_json::Value::Null)
    }

    /// Creates a JSON string value.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Json(serde_json::Value::String(s.into()))
    }

    /// True for every variant other than [`Value::Json`].
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        !matches!(self, Self::Json(_))
    }

    /// Returns the JSON value if this is a [`Value::Json`].
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Human-readable kind name, used in error messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Buffer(_) => "buffer",
            Self::Int8(_) => "int8",
            Self::Uint8(_) => "uint8",
            Self::Uint8Clamped(_) => "uint8-clamped",
            Self::Int16(_) => "int16",
            Self::Uint16(_) => "uint16",
            Self::Int32(_) => "int32",
            Self::Uint32(_) => "uint32",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Blob(_) => "blob",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Json(serde_json::Value::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Json(serde_json::Value::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Json(serde_json::Value::from(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_json() {
        assert_eq!(Value::null(), Value::Json(serde_json::Value::Null));
        assert!(!Value::null().is_binary());
    }

    #[test]
    fn binary_kinds_report_binary() {
        assert!(Value::Buffer(vec![1]).is_binary());
        assert!(Value::Blob(Blob::new("text/plain", vec![])).is_binary());
        assert!(!Value::text("abc").is_binary());
    }

    #[test]
    fn uint8_and_clamped_are_distinct() {
        assert_ne!(Value::Uint8(vec![7]), Value::Uint8Clamped(vec![7]));
    }
}

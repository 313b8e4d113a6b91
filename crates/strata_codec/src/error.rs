//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during serialization or deserialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a stored string or frame.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A tagged value carries a type code this library does not know.
    ///
    /// This indicates a corrupt entry or one written by a foreign format.
    #[error("unknown serialized type code: {code:?}")]
    UnknownSerializedType {
        /// The unrecognized four-character code.
        code: String,
    },

    /// A binary payload's length is not a multiple of its element size.
    #[error("payload length {actual} is not a multiple of element size {element_size}")]
    MisalignedPayload {
        /// Element size in bytes of the target kind.
        element_size: usize,
        /// Actual payload length in bytes.
        actual: usize,
    },

    /// Unexpected end of input while decoding a binary frame.
    #[error("unexpected end of frame")]
    UnexpectedEof,
}

impl CodecError {
    /// Creates an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Creates an unknown type code error.
    pub fn unknown_type(code: impl Into<String>) -> Self {
        Self::UnknownSerializedType { code: code.into() }
    }
}

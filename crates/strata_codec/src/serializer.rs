//! Text serialization for backends that cannot store binary natively.
//!
//! Plain JSON values are stored as their JSON text, untouched. Binary
//! values become `__stsc__:` + a four-character type code + base64 of the
//! little-endian element bytes; blobs additionally embed their content type
//! between the code and the payload. Decoding dispatches on the presence of
//! the sentinel: absent means plain JSON.

use crate::error::{CodecError, CodecResult};
use crate::value::{Blob, Value};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Sentinel prefix marking a specially serialized (non-JSON) value.
pub const SERIALIZED_MARKER: &str = "__stsc__:";

/// Marker embedding a blob's content type: `~~strata_type~{mime}~`.
const BLOB_TYPE_MARKER: &str = "~~strata_type~";

const TYPE_ARRAYBUFFER: &str = "arbf";
const TYPE_BLOB: &str = "blob";
const TYPE_INT8ARRAY: &str = "si08";
const TYPE_UINT8ARRAY: &str = "ui08";
const TYPE_UINT8CLAMPEDARRAY: &str = "uic8";
const TYPE_INT16ARRAY: &str = "si16";
// Historical on-disk spelling; kept for format stability.
const TYPE_UINT16ARRAY: &str = "ur16";
const TYPE_INT32ARRAY: &str = "si32";
const TYPE_UINT32ARRAY: &str = "ui32";
const TYPE_FLOAT32ARRAY: &str = "fl32";
const TYPE_FLOAT64ARRAY: &str = "fl64";

const TYPE_CODE_LEN: usize = 4;

/// Serializes a value to its stored-text form.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if a JSON value cannot be
/// rendered (non-finite numbers, for example).
pub fn serialize(value: &Value) -> CodecResult<String> {
    let (code, bytes) = match value {
        Value::Json(v) => {
            return serde_json::to_string(v)
                .map_err(|e| CodecError::encoding_failed(e.to_string()));
        }
        Value::Blob(blob) => {
            let mut out = String::with_capacity(
                SERIALIZED_MARKER.len()
                    + TYPE_CODE_LEN
                    + BLOB_TYPE_MARKER.len()
                    + blob.content_type.len()
                    + 1
                    + blob.bytes.len().div_ceil(3) * 4,
            );
            out.push_str(SERIALIZED_MARKER);
            out.push_str(TYPE_BLOB);
            out.push_str(BLOB_TYPE_MARKER);
            out.push_str(&blob.content_type);
            out.push('~');
            out.push_str(&STANDARD.encode(&blob.bytes));
            return Ok(out);
        }
        Value::Buffer(b) => (TYPE_ARRAYBUFFER, b.clone()),
        Value::Int8(v) => (TYPE_INT8ARRAY, v.iter().map(|n| *n as u8).collect()),
        Value::Uint8(v) => (TYPE_UINT8ARRAY, v.clone()),
        Value::Uint8Clamped(v) => (TYPE_UINT8CLAMPEDARRAY, v.clone()),
        Value::Int16(v) => (TYPE_INT16ARRAY, le_bytes(v, |n| n.to_le_bytes())),
        Value::Uint16(v) => (TYPE_UINT16ARRAY, le_bytes(v, |n| n.to_le_bytes())),
        Value::Int32(v) => (TYPE_INT32ARRAY, le_bytes(v, |n| n.to_le_bytes())),
        Value::Uint32(v) => (TYPE_UINT32ARRAY, le_bytes(v, |n| n.to_le_bytes())),
        Value::Float32(v) => (TYPE_FLOAT32ARRAY, le_bytes(v, |n| n.to_le_bytes())),
        Value::Float64(v) => (TYPE_FLOAT64ARRAY, le_bytes(v, |n| n.to_le_bytes())),
    };

    Ok(format!("{SERIALIZED_MARKER}{code}{}", STANDARD.encode(bytes)))
}

/// Deserializes a stored-text form back into the original value.
///
/// # Errors
///
/// Returns an error if the text is neither valid JSON nor a well-formed
/// tagged payload, or if its type code is unknown.
pub fn deserialize(input: &str) -> CodecResult<Value> {
    let Some(tagged) = input.strip_prefix(SERIALIZED_MARKER) else {
        let json = serde_json::from_str(input)
            .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        return Ok(Value::Json(json));
    };

    // get() rather than split_at: a foreign payload may put a multi-byte
    // character across the code boundary, which must not panic.
    let (Some(code), Some(mut body)) = (
        tagged.get(..TYPE_CODE_LEN),
        tagged.get(TYPE_CODE_LEN..),
    ) else {
        return Err(CodecError::decoding_failed("truncated type code"));
    };

    let mut content_type = None;
    if code == TYPE_BLOB {
        if let Some(rest) = body.strip_prefix(BLOB_TYPE_MARKER) {
            let end = rest
                .find('~')
                .ok_or_else(|| CodecError::decoding_failed("unterminated blob content type"))?;
            content_type = Some(rest[..end].to_string());
            body = &rest[end + 1..];
        }
    }

    let bytes = STANDARD
        .decode(body)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;

    match code {
        TYPE_ARRAYBUFFER => Ok(Value::Buffer(bytes)),
        TYPE_BLOB => Ok(Value::Blob(Blob {
            content_type: content_type.unwrap_or_default(),
            bytes,
        })),
        TYPE_INT8ARRAY => Ok(Value::Int8(bytes.iter().map(|b| *b as i8).collect())),
        TYPE_UINT8ARRAY => Ok(Value::Uint8(bytes)),
        TYPE_UINT8CLAMPEDARRAY => Ok(Value::Uint8Clamped(bytes)),
        TYPE_INT16ARRAY => Ok(Value::Int16(from_le_bytes(&bytes, i16::from_le_bytes)?)),
        TYPE_UINT16ARRAY => Ok(Value::Uint16(from_le_bytes(&bytes, u16::from_le_bytes)?)),
        TYPE_INT32ARRAY => Ok(Value::Int32(from_le_bytes(&bytes, i32::from_le_bytes)?)),
        TYPE_UINT32ARRAY => Ok(Value::Uint32(from_le_bytes(&bytes, u32::from_le_bytes)?)),
        TYPE_FLOAT32ARRAY => Ok(Value::Float32(from_le_bytes(&bytes, f32::from_le_bytes)?)),
        TYPE_FLOAT64ARRAY => Ok(Value::Float64(from_le_bytes(&bytes, f64::from_le_bytes)?)),
        other => Err(CodecError::unknown_type(other)),
    }
}

fn le_bytes<T: Copy, const N: usize>(values: &[T], to_bytes: impl Fn(T) -> [u8; N]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * N);
    for v in values {
        out.extend_from_slice(&to_bytes(*v));
    }
    out
}

fn from_le_bytes<T, const N: usize>(
    bytes: &[u8],
    from: impl Fn([u8; N]) -> T,
) -> CodecResult<Vec<T>> {
    if bytes.len() % N != 0 {
        return Err(CodecError::MisalignedPayload {
            element_size: N,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut arr = [0u8; N];
            arr.copy_from_slice(chunk);
            from(arr)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn json_passes_through_unprefixed() {
        let text = serialize(&Value::Json(serde_json::json!([1, 2, 3]))).unwrap();
        assert_eq!(text, "[1,2,3]");
        assert!(!text.starts_with(SERIALIZED_MARKER));
    }

    #[test]
    fn json_null_roundtrip() {
        let text = serialize(&Value::null()).unwrap();
        assert_eq!(deserialize(&text).unwrap(), Value::null());
    }

    #[test]
    fn binary_is_prefixed() {
        let text = serialize(&Value::Uint8(vec![1, 2, 3])).unwrap();
        assert!(text.starts_with("__stsc__:ui08"));
    }

    #[test]
    fn blob_embeds_content_type() {
        let value = Value::Blob(Blob::new("image/png", vec![0x89, 0x50]));
        let text = serialize(&value).unwrap();
        assert!(text.starts_with("__stsc__:blob~~strata_type~image/png~"));
        assert_eq!(deserialize(&text).unwrap(), value);
    }

    #[test]
    fn blob_without_type_marker_decodes_with_empty_type() {
        // Entries written before content types were embedded.
        let text = format!("{SERIALIZED_MARKER}blobAQI=");
        let value = deserialize(&text).unwrap();
        assert_eq!(value, Value::Blob(Blob::new("", vec![1, 2])));
    }

    #[test]
    fn unknown_code_is_rejected() {
        let text = format!("{SERIALIZED_MARKER}zzzzAQI=");
        let err = deserialize(&text).unwrap_err();
        assert!(matches!(err, CodecError::UnknownSerializedType { code } if code == "zzzz"));
    }

    #[test]
    fn misaligned_payload_is_rejected() {
        // Three bytes cannot form u16 elements.
        let text = format!("{SERIALIZED_MARKER}ur16{}", STANDARD.encode([1u8, 2, 3]));
        let err = deserialize(&text).unwrap_err();
        assert!(matches!(err, CodecError::MisalignedPayload { .. }));
    }

    #[test]
    fn truncated_marker_is_rejected() {
        let err = deserialize("__stsc__:ab").unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }

    #[test]
    fn signed_extremes_roundtrip() {
        for value in [
            Value::Int8(vec![i8::MIN, -1, 0, i8::MAX]),
            Value::Int16(vec![i16::MIN, -1, 0, i16::MAX]),
            Value::Int32(vec![i32::MIN, -1, 0, i32::MAX]),
            Value::Uint32(vec![0, u32::MAX]),
        ] {
            let text = serialize(&value).unwrap();
            assert_eq!(deserialize(&text).unwrap(), value);
        }
    }

    #[test]
    fn empty_payloads_roundtrip() {
        for value in [
            Value::Buffer(vec![]),
            Value::Float64(vec![]),
            Value::Blob(Blob::new("application/octet-stream", vec![])),
        ] {
            let text = serialize(&value).unwrap();
            assert_eq!(deserialize(&text).unwrap(), value);
        }
    }

    proptest! {
        #[test]
        fn buffer_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let value = Value::Buffer(bytes);
            prop_assert_eq!(deserialize(&serialize(&value).unwrap()).unwrap(), value);
        }

        #[test]
        fn uint16_roundtrip(elems in proptest::collection::vec(any::<u16>(), 0..128)) {
            let value = Value::Uint16(elems);
            prop_assert_eq!(deserialize(&serialize(&value).unwrap()).unwrap(), value);
        }

        #[test]
        fn float32_roundtrip(elems in proptest::collection::vec(
            prop::num::f32::NORMAL | prop::num::f32::ZERO, 0..64,
        )) {
            let value = Value::Float32(elems);
            prop_assert_eq!(deserialize(&serialize(&value).unwrap()).unwrap(), value);
        }

        #[test]
        fn json_string_roundtrip(s in "\\PC*") {
            let value = Value::text(s);
            prop_assert_eq!(deserialize(&serialize(&value).unwrap()).unwrap(), value);
        }
    }
}

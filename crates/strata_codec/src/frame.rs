//! Compact binary framing for stores with native binary support.
//!
//! One tag byte identifying the kind, then the payload: JSON text bytes for
//! JSON values, little-endian element bytes for the binary kinds, and a
//! length-prefixed content type before the bytes for blobs. The structured
//! backend writes these frames directly into its log records instead of
//! going through the text serializer.

use crate::error::{CodecError, CodecResult};
use crate::value::{Blob, Value};

const TAG_JSON: u8 = 0;
const TAG_BUFFER: u8 = 1;
const TAG_INT8: u8 = 2;
const TAG_UINT8: u8 = 3;
const TAG_UINT8_CLAMPED: u8 = 4;
const TAG_INT16: u8 = 5;
const TAG_UINT16: u8 = 6;
const TAG_INT32: u8 = 7;
const TAG_UINT32: u8 = 8;
const TAG_FLOAT32: u8 = 9;
const TAG_FLOAT64: u8 = 10;
const TAG_BLOB: u8 = 11;

/// Encodes a value into its binary frame.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if a JSON value cannot be
/// rendered, or if a blob content type exceeds the u16 length prefix.
pub fn encode_frame(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();

    match value {
        Value::Json(v) => {
            buf.push(TAG_JSON);
            let text =
                serde_json::to_vec(v).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
            buf.extend_from_slice(&text);
        }
        Value::Buffer(b) => {
            buf.push(TAG_BUFFER);
            buf.extend_from_slice(b);
        }
        Value::Int8(v) => {
            buf.push(TAG_INT8);
            buf.extend(v.iter().map(|n| *n as u8));
        }
        Value::Uint8(v) => {
            buf.push(TAG_UINT8);
            buf.extend_from_slice(v);
        }
        Value::Uint8Clamped(v) => {
            buf.push(TAG_UINT8_CLAMPED);
            buf.extend_from_slice(v);
        }
        Value::Int16(v) => push_elements(&mut buf, TAG_INT16, v, |n| n.to_le_bytes()),
        Value::Uint16(v) => push_elements(&mut buf, TAG_UINT16, v, |n| n.to_le_bytes()),
        Value::Int32(v) => push_elements(&mut buf, TAG_INT32, v, |n| n.to_le_bytes()),
        Value::Uint32(v) => push_elements(&mut buf, TAG_UINT32, v, |n| n.to_le_bytes()),
        Value::Float32(v) => push_elements(&mut buf, TAG_FLOAT32, v, |n| n.to_le_bytes()),
        Value::Float64(v) => push_elements(&mut buf, TAG_FLOAT64, v, |n| n.to_le_bytes()),
        Value::Blob(blob) => {
            buf.push(TAG_BLOB);
            let type_len = u16::try_from(blob.content_type.len()).map_err(|_| {
                CodecError::encoding_failed("blob content type exceeds 65535 bytes")
            })?;
            buf.extend_from_slice(&type_len.to_le_bytes());
            buf.extend_from_slice(blob.content_type.as_bytes());
            buf.extend_from_slice(&blob.bytes);
        }
    }

    Ok(buf)
}

/// Decodes a binary frame back into a value.
///
/// # Errors
///
/// Returns an error on an empty frame, an unknown tag byte, a misaligned
/// payload, or malformed embedded JSON.
pub fn decode_frame(bytes: &[u8]) -> CodecResult<Value> {
    let (&tag, payload) = bytes.split_first().ok_or(CodecError::UnexpectedEof)?;

    match tag {
        TAG_JSON => {
            let json = serde_json::from_slice(payload)
                .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
            Ok(Value::Json(json))
        }
        TAG_BUFFER => Ok(Value::Buffer(payload.to_vec())),
        TAG_INT8 => Ok(Value::Int8(payload.iter().map(|b| *b as i8).collect())),
        TAG_UINT8 => Ok(Value::Uint8(payload.to_vec())),
        TAG_UINT8_CLAMPED => Ok(Value::Uint8Clamped(payload.to_vec())),
        TAG_INT16 => Ok(Value::Int16(read_elements(payload, i16::from_le_bytes)?)),
        TAG_UINT16 => Ok(Value::Uint16(read_elements(payload, u16::from_le_bytes)?)),
        TAG_INT32 => Ok(Value::Int32(read_elements(payload, i32::from_le_bytes)?)),
        TAG_UINT32 => Ok(Value::Uint32(read_elements(payload, u32::from_le_bytes)?)),
        TAG_FLOAT32 => Ok(Value::Float32(read_elements(payload, f32::from_le_bytes)?)),
        TAG_FLOAT64 => Ok(Value::Float64(read_elements(payload, f64::from_le_bytes)?)),
        TAG_BLOB => {
            if payload.len() < 2 {
                return Err(CodecError::UnexpectedEof);
            }
            let type_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
            let rest = &payload[2..];
            if rest.len() < type_len {
                return Err(CodecError::UnexpectedEof);
            }
            let content_type = std::str::from_utf8(&rest[..type_len])
                .map_err(|_| CodecError::decoding_failed("blob content type is not UTF-8"))?
                .to_string();
            Ok(Value::Blob(Blob {
                content_type,
                bytes: rest[type_len..].to_vec(),
            }))
        }
        other => Err(CodecError::decoding_failed(format!(
            "unknown frame tag: {other}"
        ))),
    }
}

fn push_elements<T: Copy, const N: usize>(
    buf: &mut Vec<u8>,
    tag: u8,
    values: &[T],
    to_bytes: impl Fn(T) -> [u8; N],
) {
    buf.push(tag);
    for v in values {
        buf.extend_from_slice(&to_bytes(*v));
    }
}

fn read_elements<T, const N: usize>(
    payload: &[u8],
    from: impl Fn([u8; N]) -> T,
) -> CodecResult<Vec<T>> {
    if payload.len() % N != 0 {
        return Err(CodecError::MisalignedPayload {
            element_size: N,
            actual: payload.len(),
        });
    }
    Ok(payload
        .chunks_exact(N)
        .map(|chunk| {
            let mut arr = [0u8; N];
            arr.copy_from_slice(chunk);
            from(arr)
        })
        .collect())
}

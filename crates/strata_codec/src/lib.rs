//! # Strata Codec
//!
//! Value model and serialization for strata.
//!
//! Backends that can only hold text (the relational and flat backends, and
//! the structured backend when its binary probe fails) store every value as
//! a string produced by [`serialize`]. Plain JSON values are stored as their
//! JSON text, unprefixed. Binary values are tagged with a sentinel prefix
//! and a four-character type code, followed by a base64 payload, so that
//! [`deserialize`] can reconstruct the exact original kind.
//!
//! The structured backend additionally uses a compact binary frame
//! ([`encode_frame`] / [`decode_frame`]) when its store natively accepts
//! binary payloads.
//!
//! ## Round-trip guarantee
//!
//! `deserialize(&serialize(&v)?)? == v` for every supported value: byte
//! identical for the binary kinds, deep-equal for JSON.
//!
//! ```
//! use strata_codec::{deserialize, serialize, Value};
//!
//! let value = Value::Uint16(vec![1, 512, 65535]);
//! let text = serialize(&value).unwrap();
//! assert_eq!(deserialize(&text).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod serializer;
mod value;

pub use error::{CodecError, CodecResult};
pub use frame::{decode_frame, encode_frame};
pub use serializer::{deserialize, serialize, SERIALIZED_MARKER};
pub use value::{Blob, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_json_object() {
        let value = Value::Json(serde_json::json!({"x": 1, "label": "song"}));
        let text = serialize(&value).unwrap();
        assert_eq!(deserialize(&text).unwrap(), value);
    }

    #[test]
    fn roundtrip_buffer() {
        let value = Value::Buffer(vec![0, 1, 2, 254, 255]);
        let text = serialize(&value).unwrap();
        assert_eq!(deserialize(&text).unwrap(), value);
    }

    #[test]
    fn roundtrip_blob() {
        let value = Value::Blob(Blob::new("audio/mpeg", vec![0xff, 0xfb, 0x90]));
        let text = serialize(&value).unwrap();
        assert_eq!(deserialize(&text).unwrap(), value);
    }

    #[test]
    fn roundtrip_frame_float64() {
        let value = Value::Float64(vec![0.5, -1.25, 1e300]);
        let bytes = encode_frame(&value).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), value);
    }
}

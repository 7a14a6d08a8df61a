//! Numeric payload codec (C1): base64 + optional zlib-wrapped deflate,
//! typed conversion of byte runs to/from numeric vectors with endian
//! handling.
//!
//! mzXML conventionally encodes big-endian ("network") payloads; mzData
//! conventionally encodes little-endian payloads with no compression.
//! The compression flag is always per-payload, never file-wide.

use std::io::Read;

use flate2::read::DeflateDecoder;

use crate::error::CodecError;

/// Byte order of an encoded numeric payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    LittleEndian,
    BigEndian,
}

/// The element types a payload may be decoded into.
pub trait Element: Sized + Copy {
    const SIZE: usize;
    fn from_bytes(bytes: &[u8], endian: Endian) -> Self;
    fn to_bytes(self, endian: Endian) -> Vec<u8>;
}

macro_rules! impl_element {
    ($ty:ty, $size:literal) => {
        impl Element for $ty {
            const SIZE: usize = $size;

            fn from_bytes(bytes: &[u8], endian: Endian) -> Self {
                let mut buf = [0u8; $size];
                buf.copy_from_slice(bytes);
                match endian {
                    Endian::LittleEndian => <$ty>::from_le_bytes(buf),
                    Endian::BigEndian => <$ty>::from_be_bytes(buf),
                }
            }

            fn to_bytes(self, endian: Endian) -> Vec<u8> {
                match endian {
                    Endian::LittleEndian => self.to_le_bytes().to_vec(),
                    Endian::BigEndian => self.to_be_bytes().to_vec(),
                }
            }
        }
    };
}

impl_element!(u8, 1);
impl_element!(i16, 2);
impl_element!(i32, 4);
impl_element!(f32, 4);
impl_element!(f64, 8);

/// Inflate a zlib-wrapped deflate stream after skipping its 2-byte
/// compression-method/flags header (RFC 1950), leaving a raw deflate
/// stream for [`DeflateDecoder`].
fn inflate_zlib_wrapped(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let body = bytes.get(2..).unwrap_or(&[]);
    let mut decoder = DeflateDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Inflate)?;
    Ok(out)
}

/// Decode a base64 (optionally zlib-compressed) payload into a vector of
/// `T`.
pub fn decode<T: Element>(
    text: &str,
    zlib_compressed: bool,
    endian: Endian,
) -> Result<Vec<T>, CodecError> {
    let raw = base64_simd::STANDARD.decode_to_vec(text.trim().as_bytes())?;
    let bytes = if zlib_compressed {
        inflate_zlib_wrapped(&raw)?
    } else {
        raw
    };

    if bytes.len() % T::SIZE != 0 {
        return Err(CodecError::MalformedPayload {
            expected_multiple_of: T::SIZE,
            got: bytes.len(),
        });
    }

    Ok(bytes
        .chunks_exact(T::SIZE)
        .map(|chunk| T::from_bytes(chunk, endian))
        .collect())
}

/// Encode a vector of `T` into base64 text, the inverse of [`decode`]
/// without compression. `remove_padding` strips trailing `=` characters,
/// matching writers that omit base64 padding.
pub fn encode<T: Element>(values: &[T], endian: Endian, remove_padding: bool) -> String {
    let mut bytes = Vec::with_capacity(values.len() * T::SIZE);
    for v in values {
        bytes.extend(v.to_bytes(endian));
    }
    let encoded = base64_simd::STANDARD.encode_to_string(&bytes);
    if remove_padding {
        encoded.trim_end_matches('=').to_string()
    } else {
        encoded
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip<T: Element + PartialEq + std::fmt::Debug>(values: &[T], endian: Endian) {
        let encoded = encode(values, endian, false);
        let decoded: Vec<T> = decode(&encoded, false, endian).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_round_trip_all_types_all_endians() {
        for endian in [Endian::LittleEndian, Endian::BigEndian] {
            round_trip::<i16>(&[0, 1, -1, i16::MAX, i16::MIN], endian);
            round_trip::<i32>(&[0, 1, -1, i32::MAX, i32::MIN], endian);
            round_trip::<f32>(&[0.0, 1.5, -1.5, f32::MAX], endian);
            round_trip::<f64>(&[0.0, 1.5, -1.5, f64::MAX], endian);
            round_trip::<f64>(&[], endian);
        }
    }

    #[test]
    fn test_round_trip_varying_lengths() {
        for len in [0usize, 1, 2, 3, 7, 16, 257, 1024] {
            let values: Vec<f64> = (0..len).map(|i| i as f64 * 0.5).collect();
            round_trip(&values, Endian::BigEndian);
            round_trip(&values, Endian::LittleEndian);
        }
    }

    #[test]
    fn test_malformed_payload_length() {
        // 3 bytes cannot be split into f64 (8 bytes) or i16 (2 bytes) evenly... but can for i16? 3 % 2 != 0.
        let text = base64_simd::STANDARD.encode_to_string([1u8, 2, 3]);
        let result: Result<Vec<i16>, _> = decode(&text, false, Endian::LittleEndian);
        assert!(matches!(
            result,
            Err(CodecError::MalformedPayload {
                expected_multiple_of: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn test_zlib_wrapped_round_trip() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let values: Vec<f32> = (0..100).map(|i| i as f32 * 1.1).collect();
        let mut raw = Vec::new();
        for v in &values {
            raw.extend(v.to_le_bytes());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();
        let text = base64_simd::STANDARD.encode_to_string(&compressed);

        let decoded: Vec<f32> = decode(&text, true, Endian::LittleEndian).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_network_byte_order_is_big_endian() {
        let values = [100.0f32, 500.0, 200.0, 1000.0];
        let encoded = encode(&values, Endian::BigEndian, false);
        let decoded: Vec<f32> = decode(&encoded, false, Endian::BigEndian).unwrap();
        assert_eq!(decoded, values);
        let wrong: Vec<f32> = decode(&encoded, false, Endian::LittleEndian).unwrap();
        assert_ne!(wrong, values);
    }
}

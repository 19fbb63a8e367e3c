//! # CBOR
//!
//! The subset of RFC 8949 needed by COSE_Sign1: unsigned/negative integers
//! (major types 0/1), byte strings (2), text strings (3), arrays (4), maps
//! (5) including integer keys, and the simple values true, false, null, and
//! undefined.
//!
//! Maps whose keys are all integers (as COSE headers require) are emitted in
//! canonical order: shortest encoding first, ties broken by lexicographic
//! byte order. Decoding is total on well-formed input and fails with a
//! [`CodecError`] carrying offset and reason otherwise.

use crate::codec::CodecError;

/// A CBOR data item in the COSE subset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Major types 0 and 1. Negative values use major type 1.
    Int(i64),

    /// Major type 2.
    Bytes(Vec<u8>),

    /// Major type 3.
    Text(String),

    /// Major type 4.
    Array(Vec<Value>),

    /// Major type 5. Entry order is preserved on decode; integer-keyed maps
    /// are reordered canonically on encode.
    Map(Vec<(Value, Value)>),

    /// Simple values 20 and 21.
    Bool(bool),

    /// Simple value 22.
    Null,

    /// Simple value 23.
    Undefined,
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Encode a [`Value`] to CBOR bytes.
#[must_use]
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(n) => {
            if *n >= 0 {
                write_head(0, *n as u64, out);
            } else {
                write_head(1, !(*n) as u64, out);
            }
        }
        Value::Bytes(b) => {
            write_head(2, b.len() as u64, out);
            out.extend_from_slice(b);
        }
        Value::Text(t) => {
            write_head(3, t.len() as u64, out);
            out.extend_from_slice(t.as_bytes());
        }
        Value::Array(items) => {
            write_head(4, items.len() as u64, out);
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(entries) => {
            write_head(5, entries.len() as u64, out);
            for (k, v) in ordered_entries(entries) {
                encode_into(k, out);
                encode_into(v, out);
            }
        }
        Value::Bool(false) => out.push(0xf4),
        Value::Bool(true) => out.push(0xf5),
        Value::Null => out.push(0xf6),
        Value::Undefined => out.push(0xf7),
    }
}

/// Canonical ordering for integer-keyed maps: shortest encoded key first,
/// ties broken bytewise. Maps with any non-integer key keep their order.
fn ordered_entries(entries: &[(Value, Value)]) -> Vec<(&Value, &Value)> {
    let mut refs: Vec<(&Value, &Value)> = entries.iter().map(|(k, v)| (k, v)).collect();
    if entries.iter().all(|(k, _)| matches!(k, Value::Int(_))) {
        refs.sort_by(|&(a, _), &(b, _)| {
            let ea = encode(a);
            let eb = encode(b);
            ea.len().cmp(&eb.len()).then_with(|| ea.cmp(&eb))
        });
    }
    refs
}

fn write_head(major: u8, arg: u64, out: &mut Vec<u8>) {
    let major = major << 5;
    if arg < 24 {
        out.push(major | arg as u8);
    } else if arg <= u64::from(u8::MAX) {
        out.push(major | 24);
        out.push(arg as u8);
    } else if arg <= u64::from(u16::MAX) {
        out.push(major | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u64::from(u32::MAX) {
        out.push(major | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

/// Decode a single CBOR data item, requiring the input to be fully consumed.
///
/// # Errors
///
/// Returns a [`CodecError`] with offset and reason on malformed input,
/// unsupported major types (tags, floats), indefinite lengths, or trailing
/// bytes.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut reader = Reader { bytes, pos: 0 };
    let value = reader.read_value()?;
    if reader.pos != bytes.len() {
        return Err(CodecError::new(reader.pos, "trailing bytes after data item"));
    }
    Ok(value)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn read_value(&mut self) -> Result<Value, CodecError> {
        let offset = self.pos;
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        match major {
            0 => {
                let n = self.read_arg(info, offset)?;
                i64::try_from(n)
                    .map(Value::Int)
                    .map_err(|_| CodecError::new(offset, "unsigned integer out of range"))
            }
            1 => {
                let n = self.read_arg(info, offset)?;
                let n = i64::try_from(n)
                    .map_err(|_| CodecError::new(offset, "negative integer out of range"))?;
                Ok(Value::Int(-1 - n))
            }
            2 => {
                let len = self.read_len(info, offset)?;
                Ok(Value::Bytes(self.read_exact(len, offset)?.to_vec()))
            }
            3 => {
                let len = self.read_len(info, offset)?;
                let raw = self.read_exact(len, offset)?;
                String::from_utf8(raw.to_vec())
                    .map(Value::Text)
                    .map_err(|_| CodecError::new(offset, "text string is not valid UTF-8"))
            }
            4 => {
                let len = self.read_len(info, offset)?;
                let mut items = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            5 => {
                let len = self.read_len(info, offset)?;
                let mut entries = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    let k = self.read_value()?;
                    let v = self.read_value()?;
                    entries.push((k, v));
                }
                Ok(Value::Map(entries))
            }
            7 => match info {
                20 => Ok(Value::Bool(false)),
                21 => Ok(Value::Bool(true)),
                22 => Ok(Value::Null),
                23 => Ok(Value::Undefined),
                _ => Err(CodecError::new(offset, format!("unsupported simple value {info}"))),
            },
            _ => Err(CodecError::new(offset, format!("unsupported major type {major}"))),
        }
    }

    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| CodecError::new(self.pos, "unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, len: usize, offset: usize) -> Result<&[u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CodecError::new(offset, "length exceeds remaining input"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_arg(&mut self, info: u8, offset: usize) -> Result<u64, CodecError> {
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => Ok(u64::from(self.read_byte()?)),
            25 => {
                let raw = self.read_exact(2, offset)?;
                Ok(u64::from(u16::from_be_bytes([raw[0], raw[1]])))
            }
            26 => {
                let raw = self.read_exact(4, offset)?;
                Ok(u64::from(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])))
            }
            27 => {
                let raw = self.read_exact(8, offset)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Ok(u64::from_be_bytes(buf))
            }
            31 => Err(CodecError::new(offset, "indefinite lengths are not supported")),
            _ => Err(CodecError::new(offset, format!("reserved additional info {info}"))),
        }
    }

    fn read_len(&mut self, info: u8, offset: usize) -> Result<usize, CodecError> {
        let arg = self.read_arg(info, offset)?;
        usize::try_from(arg).map_err(|_| CodecError::new(offset, "length exceeds platform size"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let value = Value::Array(vec![
            Value::Int(0),
            Value::Int(23),
            Value::Int(24),
            Value::Int(1000),
            Value::Int(-1),
            Value::Int(-500),
            Value::Bytes(vec![1, 2, 3]),
            Value::Text("Signature1".to_string()),
            Value::Map(vec![(Value::Int(1), Value::Int(-8))]),
            Value::Bool(true),
            Value::Bool(false),
            Value::Null,
            Value::Undefined,
        ]);

        let encoded = encode(&value);
        let decoded = decode(&encoded).expect("should decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn integer_head_encodings() {
        assert_eq!(encode(&Value::Int(0)), vec![0x00]);
        assert_eq!(encode(&Value::Int(23)), vec![0x17]);
        assert_eq!(encode(&Value::Int(24)), vec![0x18, 0x18]);
        assert_eq!(encode(&Value::Int(256)), vec![0x19, 0x01, 0x00]);
        assert_eq!(encode(&Value::Int(-1)), vec![0x20]);
        assert_eq!(encode(&Value::Int(-8)), vec![0x27]);
    }

    #[test]
    fn integer_keyed_maps_encode_canonically() {
        let a = Value::Map(vec![
            (Value::Int(3), Value::Text("c".to_string())),
            (Value::Int(1), Value::Text("a".to_string())),
            (Value::Int(-8), Value::Text("b".to_string())),
        ]);
        let b = Value::Map(vec![
            (Value::Int(-8), Value::Text("b".to_string())),
            (Value::Int(1), Value::Text("a".to_string())),
            (Value::Int(3), Value::Text("c".to_string())),
        ]);
        assert_eq!(encode(&a), encode(&b), "key order should not affect encoding");
    }

    #[test]
    fn decode_reports_offset() {
        // array of 2 with only 1 element present
        let err = decode(&[0x82, 0x01]).expect_err("should fail");
        assert_eq!(err.offset, 2);

        // float (major 7, info 26) is outside the subset
        let err = decode(&[0xfa, 0x00, 0x00, 0x00, 0x00]).expect_err("should fail");
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let err = decode(&[0x01, 0x02]).expect_err("should fail");
        assert!(err.reason.contains("trailing"));
    }
}

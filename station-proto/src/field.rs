//! Encoding of typed values inside GATT characteristic payloads
//!
//! Multi-byte integers are little-endian throughout, except the DIP switch
//! identifier (see [`be_unsigned`]).

use crate::CodecError;

/// Widest raw integer carried by scalar and index fields
const MAX_INT_BYTES: usize = 8;

/// Shape of a single field, fixed when the registry is built
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldSpec {
    /// One byte holding 0 or 1
    Boolean,
    /// Up to `8 * num_bytes` flags, least significant bit first
    BooleanArray { num_bytes: usize },
    /// Scaled physical value
    Scalar(ScalarSpec),
    /// Plain unsigned integer in `[0, 2^(8 * num_bytes))`
    Index { num_bytes: usize },
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Bools(Vec<bool>),
    Scalar(f64),
    Index(u64),
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "boolean",
            FieldValue::Bools(_) => "boolean array",
            FieldValue::Scalar(_) => "scalar",
            FieldValue::Index(_) => "index",
        }
    }
}

impl FieldSpec {
    pub fn boolean_array(num_bytes: usize) -> Result<Self, CodecError> {
        if num_bytes == 0 {
            return Err(CodecError::InvalidSpec(
                "boolean array needs at least one byte".to_string(),
            ));
        }
        Ok(Self::BooleanArray { num_bytes })
    }

    pub fn index(num_bytes: usize) -> Result<Self, CodecError> {
        int_width(num_bytes)?;
        Ok(Self::Index { num_bytes })
    }

    /// Length of the encoded field in bytes
    pub fn num_bytes(&self) -> usize {
        match self {
            FieldSpec::Boolean => 1,
            FieldSpec::BooleanArray { num_bytes } | FieldSpec::Index { num_bytes } => *num_bytes,
            FieldSpec::Scalar(spec) => spec.num_bytes,
        }
    }

    pub fn decode(&self, raw: &[u8]) -> Result<FieldValue, CodecError> {
        match self {
            FieldSpec::Boolean => decode_bool(raw).map(FieldValue::Bool),
            FieldSpec::BooleanArray { num_bytes } => {
                decode_bools(raw, *num_bytes).map(FieldValue::Bools)
            }
            FieldSpec::Scalar(spec) => spec.decode(raw).map(FieldValue::Scalar),
            FieldSpec::Index { num_bytes } => decode_index(raw, *num_bytes).map(FieldValue::Index),
        }
    }

    pub fn encode(&self, value: &FieldValue) -> Result<Vec<u8>, CodecError> {
        match (self, value) {
            (FieldSpec::Boolean, FieldValue::Bool(b)) => Ok(encode_bool(*b)),
            (FieldSpec::BooleanArray { num_bytes }, FieldValue::Bools(bits)) => {
                encode_bools(bits, *num_bytes)
            }
            (FieldSpec::Scalar(spec), FieldValue::Scalar(v)) => spec.encode(*v),
            (FieldSpec::Index { num_bytes }, FieldValue::Index(v)) => encode_index(*v, *num_bytes),
            (spec, value) => Err(CodecError::Encode(format!(
                "{} value does not fit a {spec:?} field",
                value.kind()
            ))),
        }
    }
}

/// `raw * multiplier * 10^decimal_exponent * 2^binary_exponent`, optionally bounded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarSpec {
    multiplier: i8,
    decimal_exponent: i32,
    binary_exponent: i32,
    num_bytes: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl ScalarSpec {
    pub fn new(
        multiplier: i8,
        decimal_exponent: i32,
        binary_exponent: i32,
        num_bytes: usize,
    ) -> Result<Self, CodecError> {
        Self::bounded(multiplier, decimal_exponent, binary_exponent, num_bytes, None, None)
    }

    pub fn bounded(
        multiplier: i8,
        decimal_exponent: i32,
        binary_exponent: i32,
        num_bytes: usize,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Self, CodecError> {
        int_width(num_bytes)?;
        if multiplier == 0 || !(-10..=10).contains(&multiplier) {
            return Err(CodecError::InvalidSpec(format!(
                "multiplier {multiplier} must be non-zero and between -10 and +10"
            )));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo >= hi {
                return Err(CodecError::InvalidSpec(format!(
                    "minimum {lo} must be smaller than maximum {hi}"
                )));
            }
        }
        Ok(Self {
            multiplier,
            decimal_exponent,
            binary_exponent,
            num_bytes,
            min,
            max,
        })
    }

    pub fn num_bytes(&self) -> usize {
        self.num_bytes
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Whether the raw integer is two's complement.
    ///
    /// Only fields with both bounds present and non-zero are signed, so a
    /// range such as `[-5, 0]` is read as unsigned. Stations in the field
    /// rely on exactly this rule.
    pub fn signed(&self) -> bool {
        matches!((self.min, self.max), (Some(lo), Some(hi)) if lo != 0.0 && hi != 0.0)
    }

    /// Physical value of one raw step
    pub fn scale(&self) -> f64 {
        f64::from(self.multiplier) * 10f64.powi(self.decimal_exponent) * 2f64.powi(self.binary_exponent)
    }

    pub fn decode(&self, raw: &[u8]) -> Result<f64, CodecError> {
        let raw_int = if self.signed() {
            read_signed(raw, self.num_bytes)? as f64
        } else {
            read_unsigned(raw, self.num_bytes)? as f64
        };
        let value = raw_int
            * f64::from(self.multiplier)
            * 10f64.powi(self.decimal_exponent)
            * 2f64.powi(self.binary_exponent);
        self.check_bounds(value)?;
        Ok(value)
    }

    /// Encodes `value`, rounding to the nearest raw step
    pub fn encode(&self, value: f64) -> Result<Vec<u8>, CodecError> {
        if !value.is_finite() {
            return Err(CodecError::Encode(format!("{value} is not a finite number")));
        }
        self.check_bounds(value)?;

        let raw = (value / self.scale()).round();
        let bits = 8 * self.num_bytes as i32;
        let (lowest, limit) = if self.signed() {
            (-(2f64.powi(bits - 1)), 2f64.powi(bits - 1))
        } else {
            (0.0, 2f64.powi(bits))
        };
        if raw < lowest || raw >= limit {
            return Err(CodecError::Encode(format!(
                "raw value {raw} of {value} does not fit into {} bytes",
                self.num_bytes
            )));
        }

        let bytes = if self.signed() {
            (raw as i64).to_le_bytes()
        } else {
            (raw as u64).to_le_bytes()
        };
        Ok(bytes[..self.num_bytes].to_vec())
    }

    fn check_bounds(&self, value: f64) -> Result<(), CodecError> {
        let below = self.min.is_some_and(|lo| value < lo);
        let above = self.max.is_some_and(|hi| value > hi);
        if below || above {
            return Err(CodecError::Range {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

pub fn decode_bool(raw: &[u8]) -> Result<bool, CodecError> {
    match raw {
        [0] => Ok(false),
        [1] => Ok(true),
        [other] => Err(CodecError::Decode(format!(
            "received {other} but only 0 or 1 is allowed for a boolean"
        ))),
        _ => Err(CodecError::Decode(format!(
            "boolean field takes exactly one byte, got {}",
            raw.len()
        ))),
    }
}

pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

/// Bit `i` of byte `k` becomes flag `8k + i`
pub fn decode_bools(raw: &[u8], num_bytes: usize) -> Result<Vec<bool>, CodecError> {
    if raw.len() > num_bytes {
        return Err(CodecError::Decode(format!(
            "too many bytes ({}) for boolean array of {num_bytes} bytes",
            raw.len()
        )));
    }
    Ok(raw
        .iter()
        .flat_map(|byte| (0..8u32).map(move |i| (byte >> i) & 1 == 1))
        .collect())
}

pub fn encode_bools(bits: &[bool], num_bytes: usize) -> Result<Vec<u8>, CodecError> {
    if bits.len() > 8 * num_bytes {
        return Err(CodecError::Encode(format!(
            "too many flags ({}) for boolean array of {num_bytes} bytes",
            bits.len()
        )));
    }
    let mut out = vec![0u8; num_bytes];
    for (i, _) in bits.iter().enumerate().filter(|(_, set)| **set) {
        out[i / 8] |= 1 << (i % 8);
    }
    Ok(out)
}

pub fn decode_index(raw: &[u8], num_bytes: usize) -> Result<u64, CodecError> {
    let limit = index_limit(num_bytes)?;
    let value = read_unsigned(raw, num_bytes)?;
    if u128::from(value) >= limit {
        return Err(index_range(value as f64, limit));
    }
    Ok(value)
}

pub fn encode_index(value: u64, num_bytes: usize) -> Result<Vec<u8>, CodecError> {
    let limit = index_limit(num_bytes)?;
    if u128::from(value) >= limit {
        return Err(index_range(value as f64, limit));
    }
    Ok(value.to_le_bytes()[..num_bytes].to_vec())
}

/// Big-endian unsigned integer, used for the DIP switch identifier only
pub fn be_unsigned(raw: &[u8]) -> Result<u64, CodecError> {
    if raw.is_empty() || raw.len() > MAX_INT_BYTES {
        return Err(CodecError::Decode(format!(
            "identifier must be 1 to {MAX_INT_BYTES} bytes, got {}",
            raw.len()
        )));
    }
    Ok(raw.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}

fn int_width(num_bytes: usize) -> Result<usize, CodecError> {
    if num_bytes == 0 || num_bytes > MAX_INT_BYTES {
        return Err(CodecError::InvalidSpec(format!(
            "length in bytes ({num_bytes}) must be between 1 and {MAX_INT_BYTES}"
        )));
    }
    Ok(num_bytes)
}

fn index_limit(num_bytes: usize) -> Result<u128, CodecError> {
    Ok(1u128 << (8 * int_width(num_bytes)?))
}

fn index_range(value: f64, limit: u128) -> CodecError {
    CodecError::Range {
        value,
        min: Some(0.0),
        max: Some((limit - 1) as f64),
    }
}

fn read_unsigned(raw: &[u8], num_bytes: usize) -> Result<u64, CodecError> {
    if raw.is_empty() {
        return Err(CodecError::Decode("empty payload".to_string()));
    }
    if raw.len() > num_bytes.min(MAX_INT_BYTES) {
        return Err(CodecError::Decode(format!(
            "too many bytes ({}) for a {num_bytes} byte field",
            raw.len()
        )));
    }
    let mut buf = [0u8; MAX_INT_BYTES];
    buf[..raw.len()].copy_from_slice(raw);
    Ok(u64::from_le_bytes(buf))
}

/// Sign-extends from the width actually received
fn read_signed(raw: &[u8], num_bytes: usize) -> Result<i64, CodecError> {
    let unsigned = read_unsigned(raw, num_bytes)?;
    let shift = 64 - 8 * raw.len() as u32;
    Ok(((unsigned << shift) as i64) >> shift)
}

//! The floating point encodings used in query fields (RFC 3376 §4.1.1,
//! §4.1.7 and RFC 3810 §5.1.3, §5.1.9).
//!
//! For a code byte `v`: if bit 7 is 0 the value is `v` itself, otherwise
//! `mant = v & 0xF`, `exp = (v >> 4) & 0x7` and the value is
//! `(mant | 0x10) << (exp + 3)`. The 16-bit MLDv2 Maximum Response Code
//! uses the same scheme with a 12-bit mantissa and bit 15 as the toggle.

use std::time::Duration;

/// Decodes a Querier's Query Interval Code into seconds.
pub fn qqic_decode(code: u8) -> u32 {
    if code & 0x80 == 0 {
        u32::from(code)
    } else {
        let exp = u32::from((code >> 4) & 0x7);
        let mant = u32::from(code & 0xF);
        (mant | 0x10) << (exp + 3)
    }
}

/// Encodes seconds into a Querier's Query Interval Code.
///
/// Values above 128 lose the precision the floating format cannot
/// carry; values beyond the largest representable one (31744 s)
/// saturate there.
pub fn qqic_encode(secs: u32) -> u8 {
    encode_float(secs, 4) as u8
}

/// Decodes an IGMPv3 Maximum Response Code (tenths of a second).
pub fn max_resp_igmpv3_decode(code: u8) -> Duration {
    Duration::from_millis(u64::from(qqic_decode(code)) * 100)
}

/// Encodes a duration into an IGMPv3 Maximum Response Code.
pub fn max_resp_igmpv3_encode(value: Duration) -> u8 {
    encode_float((value.as_millis() / 100) as u32, 4) as u8
}

/// Decodes an MLDv2 Maximum Response Code (milliseconds).
pub fn max_resp_mldv2_decode(code: u16) -> Duration {
    let msec = if code & 0x8000 == 0 {
        u64::from(code)
    } else {
        let exp = u64::from((code >> 12) & 0x7);
        let mant = u64::from(code & 0xFFF);
        (mant | 0x1000) << (exp + 3)
    };
    Duration::from_millis(msec)
}

/// Encodes a duration into an MLDv2 Maximum Response Code.
pub fn max_resp_mldv2_encode(value: Duration) -> u16 {
    encode_float(value.as_millis() as u32, 12) as u16
}

/// Shared encoder: `mant_bits` wide mantissa, 3 bit exponent, toggle
/// bit directly above the exponent.
fn encode_float(value: u32, mant_bits: u32) -> u32 {
    let linear_limit = 1 << (mant_bits + 3);
    if value < linear_limit {
        return value;
    }

    // highest representable value: all-ones mantissa, exponent 7
    let max = (((1 << mant_bits) - 1) | (1 << mant_bits)) << (7 + 3);
    let value = value.min(max);

    // position of the leading bit decides the exponent
    let top = 31 - value.leading_zeros();
    let exp = top - mant_bits - 3;
    let mant = (value >> (exp + 3)) & ((1 << mant_bits) - 1);
    (1 << (mant_bits + 3)) | (exp << mant_bits) | mant
}

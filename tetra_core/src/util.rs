//! Small numeric and time helpers shared by the device and the bridge.

use std::time::Duration;

/// Round to two decimals for the wire. Non-finite values map to 0.
#[inline]
pub fn round2(x: f32) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    (f64::from(x) * 100.0).round() / 100.0
}

/// Seconds as `f32`, the unit decay rates are expressed in.
#[inline]
pub fn secs_f32(d: Duration) -> f32 {
    d.as_secs_f32()
}

/// Encode a flag the way the wire does: 1 or 0.
#[inline]
pub fn flag_u8(b: bool) -> u8 {
    u8::from(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(9.499_999), 9.5);
        assert_eq!(round2(1180.0), 1180.0);
        assert_eq!(round2(f32::NAN), 0.0);
    }
}

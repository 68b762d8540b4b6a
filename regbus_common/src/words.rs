//! Packing helpers for values wider than one register.
//!
//! Signed 32-bit quantities occupy two registers, high word first.
//! Real-valued quantities (world coordinates, angles) are transported as
//! fixed point with two decimals: `register_value = round(x * 100)`.

/// Fixed-point scale used for real-valued registers.
pub const FIXED_POINT_SCALE: f64 = 100.0;

/// Split a signed 32-bit value into `[high, low]` registers.
pub const fn split_i32(value: i32) -> [u16; 2] {
    let raw = value as u32;
    [(raw >> 16) as u16, (raw & 0xFFFF) as u16]
}

/// Join `[high, low]` registers into a signed 32-bit value.
pub const fn join_i32(high: u16, low: u16) -> i32 {
    (((high as u32) << 16) | low as u32) as i32
}

/// Encode a real value as two fixed-point registers.
///
/// Values beyond the `i32` range saturate.
pub fn encode_fixed(value: f64) -> [u16; 2] {
    let scaled = (value * FIXED_POINT_SCALE).round();
    let clamped = scaled.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
    split_i32(clamped)
}

/// Decode two fixed-point registers into a real value.
pub fn decode_fixed(high: u16, low: u16) -> f64 {
    f64::from(join_i32(high, low)) / FIXED_POINT_SCALE
}

/// Percentage `done / total` in `0..=100`. An empty total reports 100.
pub fn percent(done: usize, total: usize) -> u16 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u16
}

//! Scalar helpers shared by the control and audio code.

/// Conversion from the physics world's meters per second to script mph.
pub const MPS_TO_MPH: f32 = 2.236_936;

/// Move `value` toward `target` by at most `speed`. Never overshoots, and a
/// negative `speed` does not move `value` at all.
#[inline]
pub fn approach(target: f32, value: f32, speed: f32) -> f32 {
    let speed = speed.max(0.0);
    let delta = target - value;
    if delta > speed {
        value + speed
    } else if delta < -speed {
        value - speed
    } else {
        target
    }
}

/// Linear remap of `val` from `[a, b]` onto `[c, d]`, saturating at the ends.
/// A zero-width input range yields whichever endpoint `val` has reached.
#[inline]
pub fn remap_val_clamped(val: f32, a: f32, b: f32, c: f32, d: f32) -> f32 {
    if a == b {
        return if val >= b { d } else { c };
    }
    let t = ((val - a) / (b - a)).clamp(0.0, 1.0);
    c + (d - c) * t
}

/// `-1` for negative values, `1` otherwise (zero counts as positive).
#[inline]
pub fn sign(x: f32) -> f32 {
    if x < 0.0 { -1.0 } else { 1.0 }
}

//! Tracking space → skeleton space conversion.
//!
//! | Space     | Handedness | Up | Forward | Units                 |
//! |-----------|------------|----|---------|-----------------------|
//! | tracking  | right      | +Y | −Z      | meters                |
//! | skeleton  | left       | +Z | +Y      | `scale` units / meter |
//!
//! Every function here is pure. Rotations are renormalized before they leave
//! this module so callers can write them straight into a [`BoneFrame`].
//!
//! [`BoneFrame`]: crate::types::BoneFrame

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Quaternion relabeling applied to tracked rotations.
///
/// Pick one per integration and use it for every bone; mixing conventions
/// between head and hands mirrors the limbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationConvention {
    /// Swap the Y and Z components.
    #[default]
    AxisSwap,
    /// Rotate −90° about tracking X.
    PitchDown90,
}

impl RotationConvention {
    pub fn convert(self, q: Quat) -> Quat {
        match self {
            RotationConvention::AxisSwap => convert_rotation(q),
            RotationConvention::PitchDown90 => convert_rotation_pitch_down(q),
        }
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// `(x, y, z)` meters → `(x·s, −z·s, y·s)` skeleton units.
pub fn convert_position(p: Vec3, scale: f32) -> Vec3 {
    Vec3::new(p.x * scale, -p.z * scale, p.y * scale)
}

/// Inverse of [`convert_position`].
pub fn to_tracking_position(p: Vec3, scale: f32) -> Vec3 {
    if scale == 0.0 {
        return Vec3::ZERO;
    }
    Vec3::new(p.x / scale, p.z / scale, -p.y / scale)
}

// ---------------------------------------------------------------------------
// Rotations
// ---------------------------------------------------------------------------

/// `x' = x, y' = z, z' = y, w' = w`, renormalized.
pub fn convert_rotation(q: Quat) -> Quat {
    renormalize(Quat::from_xyzw(q.x, q.z, q.y, q.w))
}

/// −90° about tracking X, renormalized.
pub fn convert_rotation_pitch_down(q: Quat) -> Quat {
    let k = std::f32::consts::FRAC_1_SQRT_2;
    renormalize(Quat::from_xyzw(
        (q.x - q.w) * k,
        (q.y + q.z) * k,
        (q.z - q.y) * k,
        (q.w + q.x) * k,
    ))
}

/// Divide through by the magnitude when it is positive; a zero quaternion is
/// returned unchanged.
pub fn renormalize(q: Quat) -> Quat {
    let mag = (q.w * q.w + q.x * q.x + q.y * q.y + q.z * q.z).sqrt();
    if mag > 0.0 {
        Quat::from_xyzw(q.x / mag, q.y / mag, q.z / mag, q.w / mag)
    } else {
        q
    }
}

/// Pitch about the X axis by `degrees`. Used as the grip correction.
pub fn grip_rotation(degrees: f32) -> Quat {
    let half = degrees.to_radians() * 0.5;
    Quat::from_xyzw(half.sin(), 0.0, 0.0, half.cos())
}

// ---------------------------------------------------------------------------
// Euler helpers
// ---------------------------------------------------------------------------

/// `(pitch, yaw, roll)` in degrees; roll about X, pitch about Y, yaw about Z.
///
/// Pitch saturates at ±90° when the input is at gimbal lock.
pub fn euler_degrees(q: Quat) -> (f32, f32, f32) {
    let (w, x, y, z) = (q.w, q.x, q.y, q.z);

    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));

    let sinp = 2.0 * (w * y - z * x);
    let pitch = if sinp.abs() >= 1.0 {
        std::f32::consts::FRAC_PI_2.copysign(sinp)
    } else {
        sinp.asin()
    };

    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));

    (pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
}

/// Inverse of [`euler_degrees`].
pub fn quat_from_euler_degrees(pitch: f32, yaw: f32, roll: f32) -> Quat {
    let q = Quat::from_rotation_z(yaw.to_radians())
        * Quat::from_rotation_y(pitch.to_radians())
        * Quat::from_rotation_x(roll.to_radians());
    renormalize(q)
}

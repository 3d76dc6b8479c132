//! Two-bone analytic arm solver.
//!
//! ```text
//!   shoulder ●───── upper ─────● elbow
//!             \               /
//!              \  distance   / fore
//!               \           /
//!                ●─────────
//!               hand
//! ```
//!
//! The two interior angles come from the law of cosines. The plane the
//! triangle lies in is picked by the pole vector: the elbow is pushed towards
//! the pole's component perpendicular to the reach direction, so the elbow
//! does not flip between ticks.

use glam::{Quat, Vec3};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::IkError;
use crate::types::Calibration;

/// Axis a bone points along in its own rest frame.
pub const REST_AXIS: Vec3 = Vec3::X;

/// Shortest reach the solver works with.
const MIN_REACH: f32 = 1e-4;

/// Output of one [`ArmChain::solve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IkSolution {
    pub elbow_position: Vec3,
    /// Hand end-effector after reach clamping.
    pub hand_position: Vec3,
    /// Upper arm rotation taking [`REST_AXIS`] onto shoulder → elbow.
    pub upper_arm_rotation: Quat,
    /// Forearm rotation relative to the upper arm.
    pub forearm_rotation: Quat,
    /// Radians between the upper arm and the reach direction.
    pub shoulder_angle: f32,
    /// Interior radians at the elbow.
    pub elbow_angle: f32,
    /// Reach after clamping.
    pub distance: f32,
}

impl IkSolution {
    /// Identity rotations, used when no valid chain exists.
    pub fn rest(shoulder: Vec3, target: Vec3) -> Self {
        Self {
            elbow_position: shoulder,
            hand_position: target,
            upper_arm_rotation: Quat::IDENTITY,
            forearm_rotation: Quat::IDENTITY,
            shoulder_angle: 0.0,
            elbow_angle: 0.0,
            distance: (target - shoulder).length(),
        }
    }
}

/// Shoulder → elbow → hand chain with fixed segment lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmChain {
    upper: f32,
    fore: f32,
}

impl ArmChain {
    pub fn new(upper: f32, fore: f32) -> Result<Self, IkError> {
        if !(upper > 0.0 && fore > 0.0) {
            return Err(IkError::NonPositiveLength { upper, fore });
        }
        Ok(Self { upper, fore })
    }

    pub fn from_calibration(cal: &Calibration) -> Result<Self, IkError> {
        Self::new(cal.upper_arm_length, cal.forearm_length)
    }

    pub fn upper(&self) -> f32 {
        self.upper
    }

    pub fn fore(&self) -> f32 {
        self.fore
    }

    /// Longest reach the solver will use for a given softening margin.
    pub fn max_reach(&self, margin: f32) -> f32 {
        (self.upper + self.fore - margin).max(MIN_REACH)
    }

    /// Solve for the elbow given a shoulder anchor and a hand target.
    ///
    /// Targets beyond `upper + fore − margin` are pulled in along the reach
    /// direction. `pole` biases which side the elbow bends towards; `None`
    /// or a pole parallel to the reach falls back to an arbitrary
    /// perpendicular.
    pub fn solve(&self, shoulder: Vec3, target: Vec3, pole: Option<Vec3>, margin: f32) -> IkSolution {
        let reach = target - shoulder;
        let raw_distance = reach.length();
        let dir = if raw_distance > MIN_REACH {
            reach / raw_distance
        } else {
            REST_AXIS
        };

        let distance = raw_distance.clamp(MIN_REACH, self.max_reach(margin));
        let (u, f, d) = (self.upper, self.fore, distance);

        let cos_elbow = ((u * u + f * f - d * d) / (2.0 * u * f)).clamp(-1.0, 1.0);
        let cos_shoulder = ((u * u + d * d - f * f) / (2.0 * u * d)).clamp(-1.0, 1.0);
        let elbow_angle = cos_elbow.acos();
        let shoulder_angle = cos_shoulder.acos();

        let bend = bend_direction(dir, pole);
        let elbow_dir = dir * shoulder_angle.cos() + bend * shoulder_angle.sin();

        let hand_position = shoulder + dir * distance;
        let elbow_position = shoulder + elbow_dir * u;
        let fore_dir = (hand_position - elbow_position)
            .try_normalize()
            .unwrap_or(dir);

        let upper_arm_rotation = Quat::from_rotation_arc(REST_AXIS, elbow_dir);
        let forearm_world = Quat::from_rotation_arc(REST_AXIS, fore_dir);
        let forearm_rotation = (upper_arm_rotation.inverse() * forearm_world).normalize();

        if !(elbow_angle.is_finite() && shoulder_angle.is_finite()) {
            warn!("arm solve produced non-finite angles; holding rest pose");
            return IkSolution::rest(shoulder, hand_position);
        }

        IkSolution {
            elbow_position,
            hand_position,
            upper_arm_rotation,
            forearm_rotation,
            shoulder_angle,
            elbow_angle,
            distance,
        }
    }
}

/// Unit vector perpendicular to `dir`, as close to `pole` as possible.
fn bend_direction(dir: Vec3, pole: Option<Vec3>) -> Vec3 {
    pole.and_then(|p| (p - dir * p.dot(dir)).try_normalize())
        .unwrap_or_else(|| dir.any_orthonormal_vector())
}

// ---------------------------------------------------------------------------
// Smoothing
// ---------------------------------------------------------------------------

/// One-step low-pass on the hand target: the average of this tick's target
/// and the previous one. Adds a sample of latency.
#[derive(Debug, Clone, Default)]
pub struct HandSmoother {
    previous: Option<Vec3>,
}

impl HandSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn smooth(&mut self, target: Vec3) -> Vec3 {
        let out = match self.previous {
            Some(prev) => (prev + target) * 0.5,
            None => target,
        };
        self.previous = Some(target);
        out
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

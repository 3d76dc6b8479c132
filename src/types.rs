//! Core pose types shared across all modules.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::convert::RotationConvention;
use crate::error::ConfigError;
use crate::protocol::{FrameFlags, DEFAULT_PIPE_NAME, PROTOCOL_VERSION};

/// Accepted band for the norm of a decoded quaternion.
pub const QUAT_NORM_MIN: f32 = 0.9;
pub const QUAT_NORM_MAX: f32 = 1.1;

// ---------------------------------------------------------------------------
// Tracking-space poses
// ---------------------------------------------------------------------------

/// Orientation + position of one tracked device, in tracking space
/// (right-handed, Y-up, −Z forward, meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedPose {
    pub rotation: Quat,
    pub position: Vec3,
}

impl TrackedPose {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    pub fn new(rotation: Quat, position: Vec3) -> Self {
        Self { rotation, position }
    }

    /// Left/right mirror across the tracking-space YZ plane.
    ///
    /// This is an approximation for an untracked off-hand: X position and the
    /// rotation's X component are negated, everything else is kept.
    pub fn mirrored(&self) -> Self {
        Self {
            rotation: Quat::from_xyzw(
                -self.rotation.x,
                self.rotation.y,
                self.rotation.z,
                self.rotation.w,
            ),
            position: Vec3::new(-self.position.x, self.position.y, self.position.z),
        }
    }

    pub fn rotation_norm(&self) -> f32 {
        self.rotation.length()
    }
}

impl Default for TrackedPose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Controller buttons and analog inputs carried by the optional input trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    pub right_trigger: f32,
    pub right_grip: f32,
    pub left_trigger: f32,
    pub left_grip: f32,
    pub right_menu: f32,
    pub right_system: f32,
    pub left_menu: f32,
    pub left_system: f32,
    pub right_pad: [f32; 2],
    pub left_pad: [f32; 2],
    pub a_button: f32,
    pub b_button: f32,
    pub x_button: f32,
    pub y_button: f32,
}

/// One decoded observation from the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub version: u32,
    pub flags: FrameFlags,
    pub head: TrackedPose,
    pub primary_controller: TrackedPose,
    /// Always populated. Tracked only when `flags` contains
    /// [`FrameFlags::SECONDARY_CONTROLLER`]; otherwise the mirror of the
    /// primary controller.
    pub secondary_controller: TrackedPose,
    /// Primary controller position relative to the head, tracking space.
    pub relative_position: Vec3,
    pub timestamp_seconds: f64,
    pub input: Option<InputState>,
}

impl PoseSample {
    /// Build a current-version sample. A missing secondary controller is
    /// synthesized by mirroring the primary.
    pub fn new(
        head: TrackedPose,
        primary_controller: TrackedPose,
        secondary_controller: Option<TrackedPose>,
        relative_position: Vec3,
        timestamp_seconds: f64,
    ) -> Self {
        let mut flags = FrameFlags::BASIC;
        let secondary_controller = match secondary_controller {
            Some(pose) => {
                flags |= FrameFlags::SECONDARY_CONTROLLER;
                pose
            }
            None => primary_controller.mirrored(),
        };

        Self {
            version: PROTOCOL_VERSION,
            flags,
            head,
            primary_controller,
            secondary_controller,
            relative_position,
            timestamp_seconds,
            input: None,
        }
    }

    pub fn with_input(mut self, input: InputState) -> Self {
        self.flags |= FrameFlags::INPUT_STATE;
        self.input = Some(input);
        self
    }

    pub fn has_tracked_secondary(&self) -> bool {
        self.flags.contains(FrameFlags::SECONDARY_CONTROLLER)
    }

    /// First quaternion whose norm falls outside
    /// [`QUAT_NORM_MIN`]..=[`QUAT_NORM_MAX`], by device name.
    pub fn norm_violation(&self) -> Option<(&'static str, f32)> {
        let mut poses = vec![
            ("head", &self.head),
            ("primary_controller", &self.primary_controller),
        ];
        if self.has_tracked_secondary() {
            poses.push(("secondary_controller", &self.secondary_controller));
        }

        poses.into_iter().find_map(|(name, pose)| {
            let norm = pose.rotation_norm();
            let in_band = (QUAT_NORM_MIN..=QUAT_NORM_MAX).contains(&norm);
            (!in_band).then_some((name, norm))
        })
    }

    pub fn is_valid(&self) -> bool {
        self.norm_violation().is_none()
    }
}

// ---------------------------------------------------------------------------
// Skeleton-space frames
// ---------------------------------------------------------------------------

/// A joint transform in target (skeleton) space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneFrame {
    pub position: Vec3,
    pub rotation: Quat,
}

impl BoneFrame {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}

impl Default for BoneFrame {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Body proportions in target units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub player_height: f32,
    pub shoulder_width: f32,
    pub upper_arm_length: f32,
    pub forearm_length: f32,
}

impl Calibration {
    /// Proportions derived from standing head height.
    pub fn from_head_height(player_height: f32) -> Self {
        Self {
            player_height,
            shoulder_width: player_height * 0.25,
            upper_arm_length: player_height * 0.17,
            forearm_length: player_height * 0.15,
        }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            player_height: 175.0,
            shoulder_width: 40.0,
            upper_arm_length: 30.0,
            forearm_length: 25.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel state & health
// ---------------------------------------------------------------------------

/// Connection state owned by the frame decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Transport health as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelHealth {
    Disconnected,
    Connected,
    VersionMismatch,
}

impl ChannelHealth {
    /// Scalar code for hosts that publish a single status value.
    pub fn status_code(self) -> u8 {
        match self {
            ChannelHealth::Disconnected => 0,
            ChannelHealth::Connected => 1,
            ChannelHealth::VersionMismatch => 2,
        }
    }

    pub fn from_status_code(code: u8) -> Self {
        match code {
            1 => ChannelHealth::Connected,
            2 => ChannelHealth::VersionMismatch,
            _ => ChannelHealth::Disconnected,
        }
    }
}

impl std::fmt::Display for ChannelHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelHealth::Disconnected => "disconnected",
            ChannelHealth::Connected => "connected",
            ChannelHealth::VersionMismatch => "version-mismatch",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_decoded: u64,
    /// Samples replaced in the slot before the consumer took them.
    pub samples_overwritten: u64,
    pub invalid_samples: u64,
    pub reconnect_attempts: u64,
    pub consumer_ticks: u64,
    /// Consumer ticks that found no new sample.
    pub idle_ticks: u64,
    pub health: ChannelHealth,
}

/// Which bones the retargeter owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetargetMode {
    /// Head, camera, right arm chain, both hands and the weapon.
    #[default]
    Normal,
    /// Head is driven by an external tracker; only hands and weapon are written.
    HandsOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetargetConfig {
    /// Target units per tracking meter.
    pub scale: f32,
    /// Camera anchor relative to the head (forward, up).
    pub camera_offset: Vec3,
    /// Pitch applied to the primary hand to line up with a natural grip.
    pub grip_pitch_degrees: f32,
    /// Vertical distance from head to clavicle.
    pub clavicle_drop: f32,
    /// Held-object offset in the hand's right/forward/up basis.
    pub weapon_offset: Vec3,
    /// Elbow bias direction for the arm solver.
    pub pole_vector: Vec3,
    /// Softening margin subtracted from full arm reach.
    pub reach_margin: f32,
    pub rotation_convention: RotationConvention,
    /// Average the hand target with the previous tick's before solving.
    pub smooth_hand_target: bool,
    pub mode: RetargetMode,
    /// Fixed proportions; skips first-sample calibration when set.
    pub calibration: Option<Calibration>,
    /// Bone summary log cadence, in productive ticks.
    pub log_every_ticks: u64,
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            scale: 70.0,
            camera_offset: Vec3::new(0.0, 8.0, 5.0),
            grip_pitch_degrees: -45.0,
            clavicle_drop: 15.0,
            weapon_offset: Vec3::new(0.0, 10.0, -5.0),
            pole_vector: Vec3::new(0.0, 0.0, -1.0),
            reach_margin: 1.0,
            rotation_convention: RotationConvention::AxisSwap,
            smooth_hand_target: false,
            mode: RetargetMode::Normal,
            calibration: None,
            log_every_ticks: 120,
        }
    }
}

impl RetargetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(invalid("scale", format!("must be finite and positive, got {}", self.scale)));
        }
        if !self.reach_margin.is_finite() || self.reach_margin < 0.0 {
            return Err(invalid(
                "reach_margin",
                format!("must be finite and non-negative, got {}", self.reach_margin),
            ));
        }
        if !self.pole_vector.is_finite() || self.pole_vector.length_squared() < 1e-8 {
            return Err(invalid("pole_vector", "must be a finite non-zero vector".into()));
        }
        if let Some(cal) = &self.calibration {
            let usable = |len: f32| len.is_finite() && len > 0.0;
            if !(usable(cal.upper_arm_length) && usable(cal.forearm_length) && usable(cal.shoulder_width)) {
                return Err(invalid(
                    "calibration",
                    format!(
                        "arm lengths and shoulder width must be finite and positive \
                         (upper={}, fore={}, shoulder={})",
                        cal.upper_arm_length, cal.forearm_length, cal.shoulder_width
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Well-known name of the tracker's byte channel.
    pub pipe_name: String,
    /// Protocol revision this build was written against.
    pub expected_version: u32,
    /// Delay between failed connect attempts.
    pub reconnect_delay_ms: u64,
    /// Log only every Nth failed connect attempt.
    pub reconnect_log_every: u64,
    /// Consumer tick interval.
    pub tick_interval_ms: u64,
    /// Pause after a dropped connection before reconnecting.
    pub disconnect_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            expected_version: PROTOCOL_VERSION,
            reconnect_delay_ms: 1000,
            reconnect_log_every: 10,
            tick_interval_ms: 16,
            disconnect_backoff_ms: 100,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms", "must be positive".into()));
        }
        if self.reconnect_log_every == 0 {
            return Err(invalid("reconnect_log_every", "must be positive".into()));
        }
        if self.pipe_name.is_empty() {
            return Err(invalid("pipe_name", "must not be empty".into()));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { key, reason }
}

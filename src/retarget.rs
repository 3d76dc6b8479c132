//! Retargeter – maps decoded samples onto the bone table.
//!
//! One [`Retargeter::tick`] per delivered sample. Each tick fully overwrites
//! the bones the current mode owns; bones outside the mode keep whatever they
//! held.
//!
//! | Mode        | Bones written                                                        |
//! |-------------|----------------------------------------------------------------------|
//! | `Normal`    | Head, Camera, RightClavicle, RightUpperArm, RightForearm, RightHand, Weapon, LeftHand |
//! | `HandsOnly` | RightHand, Weapon, LeftHand                                          |
//!
//! Every rotation goes through the configured [`RotationConvention`]. The grip
//! correction is applied to the right hand and to a tracked left controller.
//! A left hand mirrored from the right controller has no controller in it and
//! is written without the grip.
//!
//! [`RotationConvention`]: crate::convert::RotationConvention

use glam::{Quat, Vec3};
use log::{debug, info, warn};

use crate::convert::{convert_position, grip_rotation, renormalize};
use crate::error::ConfigError;
use crate::ik::{ArmChain, HandSmoother, IkSolution};
use crate::skeleton::{BoneBindings, BoneId, PoseTable, SkeletonHost};
use crate::types::{BoneFrame, Calibration, PoseSample, RetargetConfig, RetargetMode};

const NORMAL_BONES: &[BoneId] = &[
    BoneId::Head,
    BoneId::Camera,
    BoneId::RightClavicle,
    BoneId::RightUpperArm,
    BoneId::RightForearm,
    BoneId::RightHand,
    BoneId::Weapon,
    BoneId::LeftHand,
];

const HANDS_ONLY_BONES: &[BoneId] = &[BoneId::RightHand, BoneId::Weapon, BoneId::LeftHand];

// ---------------------------------------------------------------------------
// Tick result
// ---------------------------------------------------------------------------

/// What a single [`Retargeter::tick`] did.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Productive tick counter, starting at 1.
    pub tick: u64,
    /// Calibration was (re)computed from this sample.
    pub calibrated: bool,
    /// Bones overwritten this tick.
    pub bones: &'static [BoneId],
    /// Arm solve, in `Normal` mode.
    pub ik: Option<IkSolution>,
    /// The arm chain was invalid and the rest pose was used.
    pub ik_fallback: bool,
}

#[derive(Debug)]
pub struct Retargeter {
    config: RetargetConfig,
    grip: Quat,
    table: PoseTable,
    previous: PoseTable,
    calibration: Option<Calibration>,
    chain: Option<ArmChain>,
    smoother: HandSmoother,
    tick_count: u64,
}

impl Retargeter {
    pub fn new(config: RetargetConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let grip = grip_rotation(config.grip_pitch_degrees);
        let mut retargeter = Self {
            grip,
            table: PoseTable::new(),
            previous: PoseTable::new(),
            calibration: None,
            chain: None,
            smoother: HandSmoother::new(),
            tick_count: 0,
            config,
        };
        if let Some(cal) = retargeter.config.calibration {
            retargeter.set_calibration(cal);
        }
        Ok(retargeter)
    }

    pub fn config(&self) -> &RetargetConfig {
        &self.config
    }

    pub fn mode(&self) -> RetargetMode {
        self.config.mode
    }

    /// Current bone table.
    pub fn table(&self) -> &PoseTable {
        &self.table
    }

    /// Bone table as it was before the last productive tick.
    pub fn previous(&self) -> &PoseTable {
        &self.previous
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn owned_bones(&self) -> &'static [BoneId] {
        match self.config.mode {
            RetargetMode::Normal => NORMAL_BONES,
            RetargetMode::HandsOnly => HANDS_ONLY_BONES,
        }
    }

    /// Drop the current calibration; the next sample recalibrates from its
    /// head height.
    pub fn request_recalibration(&mut self) {
        info!("recalibration requested");
        self.calibration = None;
        self.chain = None;
        self.smoother.reset();
    }

    // -----------------------------------------------------------------------
    // Main tick
    // -----------------------------------------------------------------------

    /// Retarget one sample into the bone table.
    pub fn tick(&mut self, sample: &PoseSample) -> TickReport {
        self.tick_count += 1;
        self.previous = self.table;

        let calibrated = if self.calibration.is_none() {
            self.calibrate_from(sample);
            true
        } else {
            false
        };

        let (ik, ik_fallback) = match self.config.mode {
            RetargetMode::Normal => {
                self.write_head(sample);
                let hand = self.write_hands(sample);
                let (solution, fallback) = self.write_arm(hand);
                (Some(solution), fallback)
            }
            RetargetMode::HandsOnly => {
                self.write_hands(sample);
                (None, false)
            }
        };

        let every = self.config.log_every_ticks;
        if every > 0 && self.tick_count % every == 0 {
            self.log_summary();
        }

        TickReport {
            tick: self.tick_count,
            calibrated,
            bones: self.owned_bones(),
            ik,
            ik_fallback,
        }
    }

    /// Commit the owned bones to the host. Returns how many were written.
    pub fn apply_to_host<S>(&self, host: &mut S, bindings: &mut BoneBindings<S::Handle>) -> usize
    where
        S: SkeletonHost,
    {
        bindings.commit(host, &self.table, self.owned_bones())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn set_calibration(&mut self, cal: Calibration) {
        let chain = ArmChain::from_calibration(&cal);
        debug_assert!(chain.is_ok(), "calibration produced an invalid arm chain: {cal:?}");
        if let Err(err) = &chain {
            warn!("{err}; arm bones will hold the rest pose");
        }
        self.chain = chain.ok();
        self.calibration = Some(cal);
    }

    fn calibrate_from(&mut self, sample: &PoseSample) {
        let head = convert_position(sample.head.position, self.config.scale);
        let height = head.z;

        let cal = if height.is_finite() && height > 0.0 {
            Calibration::from_head_height(height)
        } else {
            warn!("head height {height} unusable for calibration; using default proportions");
            Calibration::default()
        };

        info!(
            "calibrated: height={:.1} shoulder={:.1} upper_arm={:.1} forearm={:.1}",
            cal.player_height, cal.shoulder_width, cal.upper_arm_length, cal.forearm_length
        );
        self.set_calibration(cal);
    }

    fn convert_rotation(&self, q: Quat) -> Quat {
        self.config.rotation_convention.convert(q)
    }

    fn write_head(&mut self, sample: &PoseSample) {
        let position = convert_position(sample.head.position, self.config.scale);
        let rotation = self.convert_rotation(sample.head.rotation);

        self.table[BoneId::Head] = BoneFrame::new(position, rotation);
        self.table[BoneId::Camera] = BoneFrame::new(position + self.config.camera_offset, rotation);
    }

    /// Writes RightHand, Weapon and LeftHand. Returns the right hand frame.
    fn write_hands(&mut self, sample: &PoseSample) -> BoneFrame {
        let scale = self.config.scale;

        let hand_rot = renormalize(self.convert_rotation(sample.primary_controller.rotation) * self.grip);
        let hand = BoneFrame::new(
            convert_position(sample.primary_controller.position, scale),
            hand_rot,
        );
        self.table[BoneId::RightHand] = hand;

        // Offset is expressed in the hand's right/forward/up basis.
        let weapon_pos = hand.position + hand_rot * self.config.weapon_offset;
        self.table[BoneId::Weapon] = BoneFrame::new(weapon_pos, hand_rot);

        let left_rot = self.convert_rotation(sample.secondary_controller.rotation);
        let left_rot = if sample.has_tracked_secondary() {
            renormalize(left_rot * self.grip)
        } else {
            left_rot
        };
        self.table[BoneId::LeftHand] = BoneFrame::new(
            convert_position(sample.secondary_controller.position, scale),
            left_rot,
        );

        hand
    }

    /// Writes RightClavicle, RightUpperArm and RightForearm from the head and
    /// the already-written hand.
    fn write_arm(&mut self, hand: BoneFrame) -> (IkSolution, bool) {
        let head = self.table[BoneId::Head].position;
        let cal = self.calibration.unwrap_or_default();
        let clavicle = head + Vec3::new(cal.shoulder_width * 0.5, 0.0, -self.config.clavicle_drop);
        self.table[BoneId::RightClavicle] = BoneFrame::new(clavicle, Quat::IDENTITY);

        let target = if self.config.smooth_hand_target {
            self.smoother.smooth(hand.position)
        } else {
            hand.position
        };

        let (solution, fallback) = match &self.chain {
            Some(chain) => (
                chain.solve(clavicle, target, Some(self.config.pole_vector), self.config.reach_margin),
                false,
            ),
            None => (IkSolution::rest(clavicle, target), true),
        };

        self.table[BoneId::RightUpperArm] = BoneFrame::new(clavicle, solution.upper_arm_rotation);
        self.table[BoneId::RightForearm] =
            BoneFrame::new(solution.elbow_position, solution.forearm_rotation);

        (solution, fallback)
    }

    fn log_summary(&self) {
        for bone in [BoneId::Head, BoneId::RightHand, BoneId::Weapon] {
            let p = self.table[bone].position;
            debug!(
                "tick {} {}: ({:.1}, {:.1}, {:.1})",
                self.tick_count,
                bone.host_name(),
                p.x,
                p.y,
                p.z
            );
        }
    }
}

//! Retargeter unit tests

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use glam::{Quat, Vec3};
    use pose_retarget::{
        convert::{
            convert_position, convert_rotation, convert_rotation_pitch_down, grip_rotation,
            renormalize, RotationConvention,
        },
        error::ConfigError,
        retarget::Retargeter,
        skeleton::{BoneBindings, BoneId, SkeletonHost},
        types::{
            BoneFrame, Calibration, PoseSample, RetargetConfig, RetargetMode, TrackedPose,
        },
    };
    use tokio_test::{assert_err, assert_ok};

    const SCALE: f32 = 70.0;

    /// Head at 1.7 m, right controller forward-right and lower, both identity.
    fn scenario_sample() -> PoseSample {
        let head = TrackedPose::new(Quat::IDENTITY, Vec3::new(0.0, 1.7, 0.0));
        let right = TrackedPose::new(Quat::IDENTITY, Vec3::new(0.3, 1.2, -0.2));
        PoseSample::new(head, right, None, right.position - head.position, 1.0)
    }

    /// The scenario with the right controller moved to `x`.
    fn hand_at(x: f32) -> PoseSample {
        let mut sample = scenario_sample();
        sample.primary_controller.position.x = x;
        sample
    }

    fn retargeter(config: RetargetConfig) -> Retargeter {
        assert_ok!(Retargeter::new(config))
    }

    /// Host that knows a fixed set of bone names and records every commit.
    #[derive(Default)]
    struct RecordingHost {
        known: Vec<&'static str>,
        lookups: HashMap<String, usize>,
        commits: Vec<(usize, BoneFrame)>,
    }

    impl RecordingHost {
        fn with_all_bones() -> Self {
            Self {
                known: BoneId::ALL.iter().map(|b| b.host_name()).collect(),
                ..Default::default()
            }
        }
    }

    impl SkeletonHost for RecordingHost {
        type Handle = usize;

        fn find_bone(&mut self, name: &str) -> Option<usize> {
            *self.lookups.entry(name.to_string()).or_default() += 1;
            self.known.iter().position(|k| *k == name)
        }

        fn commit_bone_transform(&mut self, handle: usize, frame: &BoneFrame) {
            self.commits.push((handle, *frame));
        }
    }

    // -----------------------------------------------------------------------
    // End-to-end scenario
    // -----------------------------------------------------------------------

    #[test]
    fn head_height_maps_to_skeleton_up() {
        let mut r = retargeter(RetargetConfig::default());
        r.tick(&scenario_sample());

        let head = r.table()[BoneId::Head];
        assert!((head.position.z - 1.7 * SCALE).abs() < 1e-3);
        assert!(head.position.x.abs() < 1e-6);
        assert!(head.position.y.abs() < 1e-6);
    }

    #[test]
    fn hand_carries_grip_correction() {
        let mut r = retargeter(RetargetConfig::default());
        r.tick(&scenario_sample());

        let hand = r.table()[BoneId::RightHand];
        assert!(!hand.rotation.abs_diff_eq(Quat::IDENTITY, 1e-3));
        assert!(hand.rotation.abs_diff_eq(grip_rotation(-45.0), 1e-5));
        assert!(hand
            .position
            .abs_diff_eq(Vec3::new(0.3 * SCALE, 0.2 * SCALE, 1.2 * SCALE), 1e-3));
    }

    #[test]
    fn weapon_is_offset_in_hand_frame() {
        let config = RetargetConfig::default();
        let offset = config.weapon_offset;
        let mut r = retargeter(config);
        r.tick(&scenario_sample());

        let hand = r.table()[BoneId::RightHand];
        let weapon = r.table()[BoneId::Weapon];
        let delta = weapon.position - hand.position;
        assert!(delta.abs_diff_eq(hand.rotation * offset, 1e-4));
        assert!((delta.length() - offset.length()).abs() < 1e-4);
        assert_eq!(weapon.rotation, hand.rotation);
    }

    #[test]
    fn camera_sits_ahead_of_head() {
        let mut r = retargeter(RetargetConfig::default());
        r.tick(&scenario_sample());

        let head = r.table()[BoneId::Head];
        let camera = r.table()[BoneId::Camera];
        assert!((camera.position - head.position).abs_diff_eq(Vec3::new(0.0, 8.0, 5.0), 1e-4));
        assert_eq!(camera.rotation, head.rotation);
    }

    #[test]
    fn arm_chain_spans_clavicle_to_hand() {
        let mut r = retargeter(RetargetConfig::default());
        let report = r.tick(&scenario_sample());
        let cal = *assert_ok!(r.calibration().ok_or("not calibrated"));

        let head = r.table()[BoneId::Head].position;
        let clavicle = r.table()[BoneId::RightClavicle].position;
        assert!(clavicle.abs_diff_eq(head + Vec3::new(cal.shoulder_width / 2.0, 0.0, -15.0), 1e-4));
        assert_eq!(r.table()[BoneId::RightUpperArm].position, clavicle);

        let elbow = r.table()[BoneId::RightForearm].position;
        assert!(((elbow - clavicle).length() - cal.upper_arm_length).abs() < 1e-2);

        let ik = assert_ok!(report.ik.ok_or("no solve"));
        assert!(!report.ik_fallback);
        assert!(ik.elbow_angle.is_finite());
    }

    #[test]
    fn left_hand_mirrors_untracked_secondary() {
        let mut r = retargeter(RetargetConfig::default());
        r.tick(&scenario_sample());

        let right = r.table()[BoneId::RightHand].position;
        let left = r.table()[BoneId::LeftHand].position;
        assert_eq!(left.x, -right.x);
        assert_eq!(left.y, right.y);
        assert_eq!(left.z, right.z);

        // No controller in the mirrored hand, so no grip correction.
        let rotation = r.table()[BoneId::LeftHand].rotation;
        assert!(rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn tracked_left_controller_gets_grip() {
        let base = scenario_sample();
        let left = TrackedPose::new(Quat::IDENTITY, Vec3::new(-0.25, 1.1, -0.3));
        let sample = PoseSample::new(
            base.head,
            base.primary_controller,
            Some(left),
            base.relative_position,
            1.0,
        );
        let mut r = retargeter(RetargetConfig::default());
        r.tick(&sample);

        let hand = r.table()[BoneId::LeftHand];
        assert!(hand.rotation.abs_diff_eq(grip_rotation(-45.0), 1e-5));
        assert!(hand.position.abs_diff_eq(convert_position(left.position, SCALE), 1e-4));
    }

    // -----------------------------------------------------------------------
    // Rotation convention
    // -----------------------------------------------------------------------

    #[test]
    fn pitch_down_convention_applies_to_every_bone() {
        let head_q = Quat::from_rotation_y(0.4);
        let right_q = Quat::from_rotation_x(0.3) * Quat::from_rotation_z(-0.2);
        let left_q = Quat::from_rotation_z(0.5);
        let head = TrackedPose::new(head_q, Vec3::new(0.0, 1.7, 0.0));
        let right = TrackedPose::new(right_q, Vec3::new(0.3, 1.2, -0.2));
        let left = TrackedPose::new(left_q, Vec3::new(-0.3, 1.2, -0.2));
        let sample = PoseSample::new(head, right, Some(left), right.position - head.position, 1.0);

        let mut r = retargeter(RetargetConfig {
            rotation_convention: RotationConvention::PitchDown90,
            ..Default::default()
        });
        r.tick(&sample);
        let table = r.table();
        let grip = grip_rotation(-45.0);

        assert!(table[BoneId::Head].rotation.abs_diff_eq(convert_rotation_pitch_down(head_q), 1e-5));
        assert!(!table[BoneId::Head].rotation.abs_diff_eq(convert_rotation(head_q), 1e-3));
        assert_eq!(table[BoneId::Camera].rotation, table[BoneId::Head].rotation);
        assert!(table[BoneId::RightHand]
            .rotation
            .abs_diff_eq(renormalize(convert_rotation_pitch_down(right_q) * grip), 1e-5));
        assert_eq!(table[BoneId::Weapon].rotation, table[BoneId::RightHand].rotation);
        assert!(table[BoneId::LeftHand]
            .rotation
            .abs_diff_eq(renormalize(convert_rotation_pitch_down(left_q) * grip), 1e-5));

        // Positions do not depend on the convention.
        assert!(table[BoneId::RightHand]
            .position
            .abs_diff_eq(convert_position(right.position, SCALE), 1e-4));
    }

    #[test]
    fn pitch_down_convention_applies_to_mirrored_left_hand() {
        let right_q = Quat::from_rotation_x(0.3);
        let mut sample = scenario_sample();
        sample.primary_controller.rotation = right_q;
        let sample = PoseSample::new(
            sample.head,
            sample.primary_controller,
            None,
            sample.relative_position,
            1.0,
        );

        let mut r = retargeter(RetargetConfig {
            rotation_convention: RotationConvention::PitchDown90,
            ..Default::default()
        });
        r.tick(&sample);

        let mirrored = sample.primary_controller.mirrored().rotation;
        assert!(r.table()[BoneId::LeftHand]
            .rotation
            .abs_diff_eq(convert_rotation_pitch_down(mirrored), 1e-5));
    }

    // -----------------------------------------------------------------------
    // Target smoothing
    // -----------------------------------------------------------------------

    #[test]
    fn smoothing_averages_ik_target_only() {
        let mut r = retargeter(RetargetConfig {
            smooth_hand_target: true,
            ..Default::default()
        });
        let a = convert_position(Vec3::new(0.3, 1.2, -0.2), SCALE);
        let b = convert_position(Vec3::new(0.4, 1.2, -0.2), SCALE);

        let first = assert_ok!(r.tick(&hand_at(0.3)).ik.ok_or("no solve"));
        assert!(first.hand_position.abs_diff_eq(a, 1e-3));

        let second = assert_ok!(r.tick(&hand_at(0.4)).ik.ok_or("no solve"));
        assert!(second.hand_position.abs_diff_eq((a + b) * 0.5, 1e-3));

        // The hand bone keeps the tracked position.
        assert!(r.table()[BoneId::RightHand].position.abs_diff_eq(b, 1e-4));
    }

    #[test]
    fn smoothing_is_off_by_default() {
        let mut r = retargeter(RetargetConfig::default());
        assert!(!r.config().smooth_hand_target);
        let b = convert_position(Vec3::new(0.4, 1.2, -0.2), SCALE);

        r.tick(&hand_at(0.3));
        let second = assert_ok!(r.tick(&hand_at(0.4)).ik.ok_or("no solve"));
        assert!(second.hand_position.abs_diff_eq(b, 1e-3));
        assert!(r.table()[BoneId::RightHand].position.abs_diff_eq(b, 1e-4));
    }

    // -----------------------------------------------------------------------
    // Calibration
    // -----------------------------------------------------------------------

    #[test]
    fn calibrates_once_from_first_sample() {
        let mut r = retargeter(RetargetConfig::default());
        assert!(r.calibration().is_none());

        let first = r.tick(&scenario_sample());
        assert!(first.calibrated);
        let cal = *assert_ok!(r.calibration().ok_or("not calibrated"));
        assert!((cal.player_height - 119.0).abs() < 1e-3);
        assert!((cal.shoulder_width - 119.0 * 0.25).abs() < 1e-3);
        assert!((cal.upper_arm_length - 119.0 * 0.17).abs() < 1e-3);
        assert!((cal.forearm_length - 119.0 * 0.15).abs() < 1e-3);

        let mut taller = scenario_sample();
        taller.head.position.y = 2.0;
        let second = r.tick(&taller);
        assert!(!second.calibrated);
        assert_eq!(r.calibration(), Some(&cal));
    }

    #[test]
    fn recalibration_uses_next_sample() {
        let mut r = retargeter(RetargetConfig::default());
        r.tick(&scenario_sample());

        r.request_recalibration();
        let mut taller = scenario_sample();
        taller.head.position.y = 2.0;
        let report = r.tick(&taller);

        assert!(report.calibrated);
        let cal = assert_ok!(r.calibration().ok_or("not calibrated"));
        assert!((cal.player_height - 140.0).abs() < 1e-3);
    }

    #[test]
    fn unusable_head_height_falls_back_to_defaults() {
        let mut r = retargeter(RetargetConfig::default());
        let mut sample = scenario_sample();
        sample.head.position.y = -0.5;
        r.tick(&sample);
        assert_eq!(r.calibration(), Some(&Calibration::default()));
    }

    #[test]
    fn configured_calibration_skips_measurement() {
        let fixed = Calibration {
            player_height: 180.0,
            shoulder_width: 44.0,
            upper_arm_length: 32.0,
            forearm_length: 27.0,
        };
        let mut r = retargeter(RetargetConfig {
            calibration: Some(fixed),
            ..Default::default()
        });
        let report = r.tick(&scenario_sample());
        assert!(!report.calibrated);
        assert_eq!(r.calibration(), Some(&fixed));
    }

    // -----------------------------------------------------------------------
    // Modes
    // -----------------------------------------------------------------------

    #[test]
    fn hands_only_leaves_head_untouched() {
        let mut r = retargeter(RetargetConfig {
            mode: RetargetMode::HandsOnly,
            ..Default::default()
        });
        let report = r.tick(&scenario_sample());

        assert_eq!(report.bones, &[BoneId::RightHand, BoneId::Weapon, BoneId::LeftHand]);
        assert!(report.ik.is_none());
        assert_eq!(r.table()[BoneId::Head], BoneFrame::IDENTITY);
        assert_eq!(r.table()[BoneId::Camera], BoneFrame::IDENTITY);
        assert_eq!(r.table()[BoneId::RightUpperArm], BoneFrame::IDENTITY);
        assert_ne!(r.table()[BoneId::RightHand], BoneFrame::IDENTITY);
        assert_ne!(r.table()[BoneId::LeftHand], BoneFrame::IDENTITY);
    }

    #[test]
    fn previous_table_holds_last_tick() {
        let mut r = retargeter(RetargetConfig::default());
        r.tick(&scenario_sample());
        let after_first = *r.table();

        let mut moved = scenario_sample();
        moved.primary_controller.position.x = 0.4;
        r.tick(&moved);

        assert_eq!(r.previous(), &after_first);
        assert_ne!(r.table()[BoneId::RightHand], after_first[BoneId::RightHand]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = assert_err!(Retargeter::new(RetargetConfig {
            scale: 0.0,
            ..Default::default()
        }));
        assert!(matches!(err, ConfigError::Invalid { key: "scale", .. }));

        assert_err!(Retargeter::new(RetargetConfig {
            pole_vector: Vec3::ZERO,
            ..Default::default()
        }));
    }

    #[test]
    fn non_finite_calibration_is_rejected() {
        let cases = [
            Calibration {
                upper_arm_length: f32::NAN,
                ..Default::default()
            },
            Calibration {
                forearm_length: f32::INFINITY,
                ..Default::default()
            },
            Calibration {
                shoulder_width: f32::NAN,
                ..Default::default()
            },
            Calibration {
                forearm_length: -1.0,
                ..Default::default()
            },
        ];
        for cal in cases {
            let err = assert_err!(Retargeter::new(RetargetConfig {
                calibration: Some(cal),
                ..Default::default()
            }));
            assert!(matches!(err, ConfigError::Invalid { key: "calibration", .. }));
        }
    }

    // -----------------------------------------------------------------------
    // Host commits
    // -----------------------------------------------------------------------

    #[test]
    fn owned_bones_are_committed_by_name() {
        let mut r = retargeter(RetargetConfig::default());
        let mut host = RecordingHost::with_all_bones();
        let mut bindings = BoneBindings::new();

        r.tick(&scenario_sample());
        let written = r.apply_to_host(&mut host, &mut bindings);
        assert_eq!(written, BoneId::COUNT);

        let hand_handle = BoneId::ALL
            .iter()
            .position(|b| *b == BoneId::RightHand)
            .unwrap();
        let (_, hand) = host
            .commits
            .iter()
            .find(|(h, _)| *h == hand_handle)
            .unwrap();
        assert_eq!(*hand, r.table()[BoneId::RightHand]);
    }

    #[test]
    fn missing_bone_is_looked_up_once() {
        let mut r = retargeter(RetargetConfig::default());
        let mut host = RecordingHost::with_all_bones();
        host.known.retain(|name| *name != "Weapon");
        let mut bindings = BoneBindings::new();

        for _ in 0..3 {
            r.tick(&scenario_sample());
            assert_eq!(r.apply_to_host(&mut host, &mut bindings), BoneId::COUNT - 1);
        }
        assert_eq!(host.lookups["Weapon"], 1);
        assert_eq!(host.lookups["Bip01 Head"], 1);

        bindings.rebind();
        r.apply_to_host(&mut host, &mut bindings);
        assert_eq!(host.lookups["Weapon"], 2);
    }
}

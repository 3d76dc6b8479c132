//! Wire format tests

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use glam::{Quat, Vec3};
    use pose_retarget::{
        error::WireError,
        protocol::{
            decode_frame, encode_frame, frame_len, FrameFlags, FrameHeader, BASE_FRAME_LEN,
            HEADER_LEN, LEGACY_FRAME_LEN, PROTOCOL_VERSION,
        },
        types::{InputState, PoseSample, TrackedPose},
    };
    use tokio_test::{assert_err, assert_ok};

    fn sample(secondary: Option<TrackedPose>) -> PoseSample {
        let head = TrackedPose::new(
            Quat::from_rotation_y(0.3),
            Vec3::new(0.05, 1.7, -0.1),
        );
        let primary = TrackedPose::new(
            Quat::from_rotation_x(-0.4),
            Vec3::new(0.3, 1.2, -0.2),
        );
        PoseSample::new(head, primary, secondary, primary.position - head.position, 12.5)
    }

    // -----------------------------------------------------------------------
    // Frame sizes
    // -----------------------------------------------------------------------

    #[test]
    fn base_frame_is_84_bytes() {
        let bytes = encode_frame(&sample(None));
        assert_eq!(bytes.len(), BASE_FRAME_LEN);
        assert_eq!(BASE_FRAME_LEN, 84);
    }

    #[test]
    fn frame_len_sums_flagged_trailers() {
        assert_eq!(assert_ok!(frame_len(2, FrameFlags::BASIC)), 84);
        assert_eq!(
            assert_ok!(frame_len(2, FrameFlags::BASIC | FrameFlags::SECONDARY_CONTROLLER)),
            84 + 28
        );
        assert_eq!(
            assert_ok!(frame_len(2, FrameFlags::all())),
            84 + 28 + 64
        );
    }

    #[test]
    fn unknown_flag_bits_add_nothing() {
        let flags = FrameFlags::BASIC | FrameFlags::from_bits_retain(0x80);
        assert_eq!(assert_ok!(frame_len(2, flags)), BASE_FRAME_LEN);
    }

    #[test]
    fn legacy_length_ignores_second_word() {
        let flags = FrameFlags::from_bits_retain(0xdead_beef);
        assert_eq!(assert_ok!(frame_len(1, flags)), LEGACY_FRAME_LEN);
    }

    #[test]
    fn version_zero_is_rejected() {
        let err = assert_err!(frame_len(0, FrameFlags::BASIC));
        assert_eq!(err, WireError::UnsupportedVersion(0));
    }

    #[test]
    fn header_parses_version_and_flags() {
        let bytes = encode_frame(&sample(Some(TrackedPose::IDENTITY)));
        let mut head = [0u8; HEADER_LEN];
        head.copy_from_slice(&bytes[..HEADER_LEN]);
        let header = FrameHeader::parse(head);
        assert_eq!(header.version, 2);
        assert!(header.flags.contains(FrameFlags::BASIC | FrameFlags::SECONDARY_CONTROLLER));
        assert_eq!(assert_ok!(header.body_len()), 84 + 28 - HEADER_LEN);
    }

    // -----------------------------------------------------------------------
    // Current layout
    // -----------------------------------------------------------------------

    #[test]
    fn round_trip_preserves_every_field() {
        let original = sample(None);
        let decoded = assert_ok!(decode_frame(&encode_frame(&original)));
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trip_with_secondary_and_input() {
        let left = TrackedPose::new(Quat::from_rotation_z(0.2), Vec3::new(-0.25, 1.1, -0.3));
        let input = InputState {
            right_trigger: 0.75,
            left_grip: 1.0,
            right_pad: [0.1, -0.9],
            a_button: 1.0,
            ..Default::default()
        };
        let original = sample(Some(left)).with_input(input);

        let bytes = encode_frame(&original);
        assert_eq!(bytes.len(), 84 + 28 + 64);

        let decoded = assert_ok!(decode_frame(&bytes));
        assert_eq!(decoded, original);
        assert!(decoded.has_tracked_secondary());
        assert_eq!(decoded.input, Some(input));
    }

    #[test]
    fn quaternions_are_written_w_first() {
        let bytes = encode_frame(&sample(None));
        let w = f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(w, Quat::from_rotation_y(0.3).w);
    }

    #[test]
    fn missing_secondary_is_mirrored_from_primary() {
        let decoded = assert_ok!(decode_frame(&encode_frame(&sample(None))));
        let p = decoded.primary_controller;
        let s = decoded.secondary_controller;

        assert!(!decoded.has_tracked_secondary());
        assert_eq!(s.position.x, -p.position.x);
        assert_eq!(s.position.y, p.position.y);
        assert_eq!(s.position.z, p.position.z);
        assert_eq!(s.rotation.x, -p.rotation.x);
        assert_eq!(s.rotation.y, p.rotation.y);
        assert_eq!(s.rotation.z, p.rotation.z);
        assert_eq!(s.rotation.w, p.rotation.w);
    }

    #[test]
    fn truncated_frame_reports_sizes() {
        let bytes = encode_frame(&sample(None));
        let err = assert_err!(decode_frame(&bytes[..bytes.len() - 1]));
        assert_eq!(
            err,
            WireError::Truncated {
                expected: 84,
                actual: 83
            }
        );
    }

    #[test]
    fn newer_version_decodes_with_current_layout() {
        let mut original = sample(None);
        original.version = 3;
        let decoded = assert_ok!(decode_frame(&encode_frame(&original)));
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.head, original.head);
        assert_eq!(decoded.timestamp_seconds, 12.5);
    }

    #[test]
    fn older_versions_encode_as_current() {
        for version in [0, 1] {
            let mut original = sample(None);
            original.version = version;
            let bytes = encode_frame(&original);

            assert_eq!(bytes.len(), BASE_FRAME_LEN);
            assert_eq!(bytes[..4], PROTOCOL_VERSION.to_le_bytes());
            let decoded = assert_ok!(decode_frame(&bytes));
            assert_eq!(decoded.version, PROTOCOL_VERSION);
            assert_eq!(decoded.primary_controller, original.primary_controller);
        }
    }

    // -----------------------------------------------------------------------
    // Legacy layout
    // -----------------------------------------------------------------------

    fn legacy_frame(blocks: [[f32; 6]; 3]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LEGACY_FRAME_LEN);
        buf.put_u32_le(1);
        for block in blocks {
            for v in block {
                buf.put_f32_le(v);
            }
        }
        buf
    }

    #[test]
    fn legacy_frame_decodes_into_canonical_sample() {
        let bytes = legacy_frame([
            [0.0, 1.7, 0.0, 0.0, 0.0, 0.0],
            [0.3, 1.2, -0.2, 0.0, 90.0, 0.0],
            [-0.3, 1.2, -0.2, 0.0, 0.0, 0.0],
        ]);
        assert_eq!(bytes.len(), LEGACY_FRAME_LEN);

        let decoded = assert_ok!(decode_frame(&bytes));
        assert_eq!(decoded.version, 1);
        assert!(decoded.has_tracked_secondary());
        assert_eq!(decoded.head.position, Vec3::new(0.0, 1.7, 0.0));
        assert!(decoded.head.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
        assert!(decoded
            .primary_controller
            .rotation
            .abs_diff_eq(Quat::from_rotation_z(90f32.to_radians()), 1e-5));
        assert_eq!(decoded.secondary_controller.position, Vec3::new(-0.3, 1.2, -0.2));
        assert!(decoded
            .relative_position
            .abs_diff_eq(Vec3::new(0.3, -0.5, -0.2), 1e-6));
        assert_eq!(decoded.timestamp_seconds, 0.0);
    }

    #[test]
    fn short_legacy_frame_is_truncated() {
        let bytes = legacy_frame([[0.0; 6]; 3]);
        let err = assert_err!(decode_frame(&bytes[..40]));
        assert_eq!(
            err,
            WireError::Truncated {
                expected: LEGACY_FRAME_LEN,
                actual: 40
            }
        );
    }
}

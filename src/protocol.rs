//! Tracker → retargeter wire format.
//!
//! Frames arrive back-to-back on a local byte stream with no length prefix.
//! The first 8 bytes of every frame determine how long the rest is.
//!
//! ## Current layout (version 2)
//!
//! All fields little-endian, packed. Quaternions are written **w first**.
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | version (`u32`)                        |
//! | 4      | 4    | flags (`u32`, see [`FrameFlags`])      |
//! | 8      | 16   | head rotation (w, x, y, z)             |
//! | 24     | 12   | head position (x, y, z)                |
//! | 36     | 16   | primary controller rotation (w, x, y, z) |
//! | 52     | 12   | primary controller position            |
//! | 64     | 12   | primary position relative to head      |
//! | 76     | 8    | timestamp seconds (`f64`)              |
//!
//! Optional trailers follow in flag order:
//!
//! | Flag                   | Size | Content                                 |
//! |------------------------|------|-----------------------------------------|
//! | `SECONDARY_CONTROLLER` | 28   | rotation (w, x, y, z), position (x, y, z) |
//! | `INPUT_STATE`          | 64   | 16 × `f32`, see [`InputState`]          |
//!
//! ## Legacy layout (version 1)
//!
//! 76 bytes with no flags word: `version`, then head / right / left as
//! `x, y, z, pitch, yaw, roll` (degrees). The 8-byte header read therefore
//! captures the head's X position in its second word.
//!
//! ## Design rules
//!
//! 1. Unknown flag bits are carried but ignored.
//! 2. Versions newer than [`PROTOCOL_VERSION`] are decoded best-effort with the
//!    current layout; the channel reports them as a mismatch.
//! 3. Version 0 is never valid.

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::convert::quat_from_euler_degrees;
use crate::error::WireError;
use crate::types::{InputState, PoseSample, TrackedPose};

/// Protocol revision this crate writes and expects.
pub const PROTOCOL_VERSION: u32 = 2;

pub const HEADER_LEN: usize = 8;
/// Header + mandatory payload of a current-version frame.
pub const BASE_FRAME_LEN: usize = 84;
pub const LEGACY_FRAME_LEN: usize = 76;
pub const SECONDARY_LEN: usize = 28;
pub const INPUT_LEN: usize = 64;

#[cfg(windows)]
pub const DEFAULT_PIPE_NAME: &str = r"\\.\pipe\FNVRTracker";
#[cfg(not(windows))]
pub const DEFAULT_PIPE_NAME: &str = "/tmp/FNVRTracker";

bitflags! {
    /// Payload section bits in the frame header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FrameFlags: u32 {
        const BASIC = 0x01;
        const SECONDARY_CONTROLLER = 0x02;
        const INPUT_STATE = 0x04;
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireVersion {
    Legacy,
    Current,
    Newer(u32),
}

impl WireVersion {
    pub fn from_u32(version: u32) -> Result<Self, WireError> {
        match version {
            0 => Err(WireError::UnsupportedVersion(0)),
            1 => Ok(WireVersion::Legacy),
            PROTOCOL_VERSION => Ok(WireVersion::Current),
            n => Ok(WireVersion::Newer(n)),
        }
    }
}

/// The two leading words of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u32,
    /// Raw second word. Only meaningful as flags for version ≥ 2.
    pub flags: FrameFlags,
}

impl FrameHeader {
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Self {
        let mut buf = &bytes[..];
        let version = buf.get_u32_le();
        let flags = FrameFlags::from_bits_retain(buf.get_u32_le());
        Self { version, flags }
    }

    /// Full frame length, header included.
    pub fn frame_len(&self) -> Result<usize, WireError> {
        frame_len(self.version, self.flags)
    }

    pub fn body_len(&self) -> Result<usize, WireError> {
        Ok(self.frame_len()? - HEADER_LEN)
    }
}

/// Total frame length for a header. Unknown flag bits add nothing.
pub fn frame_len(version: u32, flags: FrameFlags) -> Result<usize, WireError> {
    match WireVersion::from_u32(version)? {
        WireVersion::Legacy => Ok(LEGACY_FRAME_LEN),
        WireVersion::Current | WireVersion::Newer(_) => {
            let mut len = BASE_FRAME_LEN;
            if flags.contains(FrameFlags::SECONDARY_CONTROLLER) {
                len += SECONDARY_LEN;
            }
            if flags.contains(FrameFlags::INPUT_STATE) {
                len += INPUT_LEN;
            }
            Ok(len)
        }
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode one complete frame, header included. Trailing bytes are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<PoseSample, WireError> {
    if frame.len() < HEADER_LEN {
        return Err(WireError::Truncated {
            expected: HEADER_LEN,
            actual: frame.len(),
        });
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&frame[..HEADER_LEN]);
    let header = FrameHeader::parse(header);

    let expected = header.frame_len()?;
    if frame.len() < expected {
        return Err(WireError::Truncated {
            expected,
            actual: frame.len(),
        });
    }

    match WireVersion::from_u32(header.version)? {
        WireVersion::Legacy => Ok(decode_legacy(&frame[..expected])),
        WireVersion::Current | WireVersion::Newer(_) => {
            Ok(decode_current(header, &frame[HEADER_LEN..expected]))
        }
    }
}

fn decode_current(header: FrameHeader, mut body: &[u8]) -> PoseSample {
    let head = get_pose(&mut body);
    let primary_controller = get_pose(&mut body);
    let relative_position = get_vec3(&mut body);
    let timestamp_seconds = body.get_f64_le();

    let secondary_controller = if header.flags.contains(FrameFlags::SECONDARY_CONTROLLER) {
        get_pose(&mut body)
    } else {
        primary_controller.mirrored()
    };

    let input = header
        .flags
        .contains(FrameFlags::INPUT_STATE)
        .then(|| get_input(&mut body));

    PoseSample {
        version: header.version,
        flags: header.flags,
        head,
        primary_controller,
        secondary_controller,
        relative_position,
        timestamp_seconds,
        input,
    }
}

fn decode_legacy(mut frame: &[u8]) -> PoseSample {
    let version = frame.get_u32_le();
    let head = get_legacy_pose(&mut frame);
    let right = get_legacy_pose(&mut frame);
    let left = get_legacy_pose(&mut frame);

    PoseSample {
        version,
        flags: FrameFlags::BASIC | FrameFlags::SECONDARY_CONTROLLER,
        head,
        primary_controller: right,
        secondary_controller: left,
        relative_position: right.position - head.position,
        timestamp_seconds: 0.0,
        input: None,
    }
}

fn get_vec3(buf: &mut &[u8]) -> Vec3 {
    let x = buf.get_f32_le();
    let y = buf.get_f32_le();
    let z = buf.get_f32_le();
    Vec3::new(x, y, z)
}

fn get_quat_wxyz(buf: &mut &[u8]) -> Quat {
    let w = buf.get_f32_le();
    let x = buf.get_f32_le();
    let y = buf.get_f32_le();
    let z = buf.get_f32_le();
    Quat::from_xyzw(x, y, z, w)
}

fn get_pose(buf: &mut &[u8]) -> TrackedPose {
    let rotation = get_quat_wxyz(buf);
    let position = get_vec3(buf);
    TrackedPose { rotation, position }
}

fn get_legacy_pose(buf: &mut &[u8]) -> TrackedPose {
    let position = get_vec3(buf);
    let pitch = buf.get_f32_le();
    let yaw = buf.get_f32_le();
    let roll = buf.get_f32_le();
    TrackedPose {
        rotation: quat_from_euler_degrees(pitch, yaw, roll),
        position,
    }
}

fn get_input(buf: &mut &[u8]) -> InputState {
    InputState {
        right_trigger: buf.get_f32_le(),
        right_grip: buf.get_f32_le(),
        left_trigger: buf.get_f32_le(),
        left_grip: buf.get_f32_le(),
        right_menu: buf.get_f32_le(),
        right_system: buf.get_f32_le(),
        left_menu: buf.get_f32_le(),
        left_system: buf.get_f32_le(),
        right_pad: [buf.get_f32_le(), buf.get_f32_le()],
        left_pad: [buf.get_f32_le(), buf.get_f32_le()],
        a_button: buf.get_f32_le(),
        b_button: buf.get_f32_le(),
        x_button: buf.get_f32_le(),
        y_button: buf.get_f32_le(),
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a sample with the current layout.
///
/// There is no legacy encoder: a sample whose `version` is below
/// [`PROTOCOL_VERSION`] (e.g. one decoded from a v1 frame) is written, and
/// therefore decodes, as a current-version frame. Newer versions are written
/// as-is with the current layout.
///
/// The secondary trailer is written only when the sample carries a tracked
/// secondary controller; the input trailer only when `input` is set. Any
/// unknown bits in `sample.flags` are preserved in the header.
pub fn encode_frame(sample: &PoseSample) -> Vec<u8> {
    let mut flags = sample.flags | FrameFlags::BASIC;
    flags.set(FrameFlags::INPUT_STATE, sample.input.is_some());

    let version = sample.version.max(PROTOCOL_VERSION);
    // frame_len cannot fail for version >= 2.
    let len = frame_len(version, flags).unwrap_or(BASE_FRAME_LEN);
    let mut buf = Vec::with_capacity(len);

    buf.put_u32_le(version);
    buf.put_u32_le(flags.bits());
    put_pose(&mut buf, &sample.head);
    put_pose(&mut buf, &sample.primary_controller);
    put_vec3(&mut buf, sample.relative_position);
    buf.put_f64_le(sample.timestamp_seconds);

    if flags.contains(FrameFlags::SECONDARY_CONTROLLER) {
        put_pose(&mut buf, &sample.secondary_controller);
    }
    if let Some(input) = &sample.input {
        put_input(&mut buf, input);
    }
    buf
}

fn put_vec3(buf: &mut Vec<u8>, v: Vec3) {
    buf.put_f32_le(v.x);
    buf.put_f32_le(v.y);
    buf.put_f32_le(v.z);
}

fn put_pose(buf: &mut Vec<u8>, pose: &TrackedPose) {
    let q = pose.rotation;
    buf.put_f32_le(q.w);
    buf.put_f32_le(q.x);
    buf.put_f32_le(q.y);
    buf.put_f32_le(q.z);
    put_vec3(buf, pose.position);
}

fn put_input(buf: &mut Vec<u8>, input: &InputState) {
    for v in [
        input.right_trigger,
        input.right_grip,
        input.left_trigger,
        input.left_grip,
        input.right_menu,
        input.right_system,
        input.left_menu,
        input.left_system,
        input.right_pad[0],
        input.right_pad[1],
        input.left_pad[0],
        input.left_pad[1],
        input.a_button,
        input.b_button,
        input.x_button,
        input.y_button,
    ] {
        buf.put_f32_le(v);
    }
}

//! Pose Retarget
//!
//! Reads tracked head/controller poses from a local byte channel and
//! retargets them onto a humanoid arm rig.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline  (pipeline.rs)            ← producer + consumer threads
//!   ├── FrameDecoder  (channel.rs)   ← connect / read / validate
//!   │     └── decode_frame  (protocol.rs)
//!   └── Retargeter  (retarget.rs)    ← per-tick bone update
//!         ├── convert.rs             ← tracking → skeleton space
//!         ├── ArmChain  (ik.rs)      ← two-bone shoulder/elbow solve
//!         └── PoseTable / SkeletonHost  (skeleton.rs)
//! ```
//!
//! The wire format and all pose math build without the `server` feature;
//! the channel, threads and binary need it.

// Wire format, math and retargeting are always available.
pub mod convert;
pub mod error;
pub mod ik;
pub mod protocol;
pub mod retarget;
pub mod skeleton;
pub mod types;

// Transport and threads require the `server` feature.
#[cfg(feature = "server")]
pub mod channel;
#[cfg(feature = "server")]
pub mod pipeline;

#[cfg(feature = "server")]
pub use channel::{FrameDecoder, NamedPipe, Transport};
#[cfg(feature = "server")]
pub use pipeline::{Pipeline, PipelineOutcome, PoseSnapshot};

pub use convert::RotationConvention;
pub use error::{ChannelError, ConfigError, IkError, WireError};
pub use ik::{ArmChain, IkSolution};
pub use protocol::{decode_frame, encode_frame, FrameFlags};
pub use retarget::{Retargeter, TickReport};
pub use skeleton::{BoneBindings, BoneId, PoseTable, SkeletonHost};
pub use types::{
    BoneFrame, Calibration, ChannelHealth, ChannelState, PipelineConfig, PipelineStats,
    PoseSample, RetargetConfig, RetargetMode, TrackedPose,
};

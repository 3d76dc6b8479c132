//! Bone identifiers, the pose table, and the host skeleton seam.

use std::ops::{Index, IndexMut};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::types::BoneFrame;

// ---------------------------------------------------------------------------
// Bone ids
// ---------------------------------------------------------------------------

/// Every bone the retargeter can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoneId {
    Head,
    Camera,
    RightClavicle,
    RightUpperArm,
    RightForearm,
    RightHand,
    LeftHand,
    Weapon,
}

impl BoneId {
    pub const COUNT: usize = 8;

    pub const ALL: [BoneId; Self::COUNT] = [
        BoneId::Head,
        BoneId::Camera,
        BoneId::RightClavicle,
        BoneId::RightUpperArm,
        BoneId::RightForearm,
        BoneId::RightHand,
        BoneId::LeftHand,
        BoneId::Weapon,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Node name in the host skeleton.
    pub fn host_name(self) -> &'static str {
        match self {
            BoneId::Head => "Bip01 Head",
            BoneId::Camera => "Camera1st",
            BoneId::RightClavicle => "Bip01 R Clavicle",
            BoneId::RightUpperArm => "Bip01 R UpperArm",
            BoneId::RightForearm => "Bip01 R Forearm",
            BoneId::RightHand => "Bip01 R Hand",
            BoneId::LeftHand => "Bip01 L Hand",
            BoneId::Weapon => "Weapon",
        }
    }
}

// ---------------------------------------------------------------------------
// Pose table
// ---------------------------------------------------------------------------

/// Fixed-size bone → frame table. Entries start at identity and are never
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseTable([BoneFrame; BoneId::COUNT]);

impl PoseTable {
    pub fn new() -> Self {
        Self([BoneFrame::IDENTITY; BoneId::COUNT])
    }

    pub fn get(&self, bone: BoneId) -> &BoneFrame {
        &self.0[bone.index()]
    }

    pub fn set(&mut self, bone: BoneId, frame: BoneFrame) {
        self.0[bone.index()] = frame;
    }

    pub fn iter(&self) -> impl Iterator<Item = (BoneId, &BoneFrame)> {
        BoneId::ALL.into_iter().zip(self.0.iter())
    }
}

impl Default for PoseTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<BoneId> for PoseTable {
    type Output = BoneFrame;

    fn index(&self, bone: BoneId) -> &BoneFrame {
        &self.0[bone.index()]
    }
}

impl IndexMut<BoneId> for PoseTable {
    fn index_mut(&mut self, bone: BoneId) -> &mut BoneFrame {
        &mut self.0[bone.index()]
    }
}

// ---------------------------------------------------------------------------
// Host seam
// ---------------------------------------------------------------------------

/// The animated rig the pose is written into.
///
/// Implemented by the embedding application; the core only looks bones up by
/// name and commits local transforms.
pub trait SkeletonHost {
    type Handle: Copy;

    fn find_bone(&mut self, name: &str) -> Option<Self::Handle>;

    fn commit_bone_transform(&mut self, handle: Self::Handle, frame: &BoneFrame);
}

/// Cached host handles, resolved lazily by name.
///
/// A bone the host does not have is logged once and then skipped until
/// [`rebind`](Self::rebind) is called.
#[derive(Debug)]
pub struct BoneBindings<H> {
    slots: [Binding<H>; BoneId::COUNT],
}

#[derive(Debug, Clone, Copy)]
enum Binding<H> {
    Unresolved,
    Bound(H),
    Missing,
}

impl<H: Copy> BoneBindings<H> {
    pub fn new() -> Self {
        Self {
            slots: [Binding::Unresolved; BoneId::COUNT],
        }
    }

    /// Forget every cached handle, e.g. after the host rebuilt its graph.
    pub fn rebind(&mut self) {
        self.slots = [Binding::Unresolved; BoneId::COUNT];
    }

    pub fn resolve<S>(&mut self, host: &mut S, bone: BoneId) -> Option<H>
    where
        S: SkeletonHost<Handle = H>,
    {
        let slot = &mut self.slots[bone.index()];
        match *slot {
            Binding::Bound(handle) => Some(handle),
            Binding::Missing => None,
            Binding::Unresolved => match host.find_bone(bone.host_name()) {
                Some(handle) => {
                    *slot = Binding::Bound(handle);
                    Some(handle)
                }
                None => {
                    warn!("host skeleton has no bone named '{}'", bone.host_name());
                    *slot = Binding::Missing;
                    None
                }
            },
        }
    }

    /// Commit `bones` from `table` to the host. Returns how many were written.
    pub fn commit<S>(&mut self, host: &mut S, table: &PoseTable, bones: &[BoneId]) -> usize
    where
        S: SkeletonHost<Handle = H>,
    {
        let mut written = 0;
        for &bone in bones {
            if let Some(handle) = self.resolve(host, bone) {
                host.commit_bone_transform(handle, &table[bone]);
                written += 1;
            }
        }
        written
    }
}

impl<H: Copy> Default for BoneBindings<H> {
    fn default() -> Self {
        Self::new()
    }
}

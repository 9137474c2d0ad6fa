//! Measurement channels read from the per-frame tables.
//!
//! The set is the union of everything the classifier and the proxies read, so
//! the reducer always computes every channel a downstream consumer touches.

use serde::{Deserialize, Serialize};

/// Number of declared channels.
pub const CHANNEL_COUNT: usize = 18;

/// A facial Action Unit intensity/presence or head-pose channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Inner brow raiser
    Au01,
    /// Outer brow raiser
    Au02,
    /// Brow lowerer (furrow)
    Au04,
    /// Upper lid raiser
    Au05,
    /// Cheek raiser
    Au06,
    /// Lid tightener
    Au07,
    /// Nose wrinkler
    Au09,
    /// Upper lip raiser
    Au10,
    /// Lip corner puller (smile)
    Au12,
    /// Lip corner depressor
    Au15,
    /// Lip stretcher
    Au20,
    /// Lip tightener
    Au23,
    /// Lips part
    Au25,
    /// Jaw drop
    Au26,
    /// Blink presence (0/1 per frame)
    Au45c,
    PoseRx,
    PoseRy,
    PoseRz,
}

impl Channel {
    /// Every channel in log column order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Au01,
        Channel::Au02,
        Channel::Au04,
        Channel::Au05,
        Channel::Au06,
        Channel::Au07,
        Channel::Au09,
        Channel::Au10,
        Channel::Au12,
        Channel::Au15,
        Channel::Au20,
        Channel::Au23,
        Channel::Au25,
        Channel::Au26,
        Channel::Au45c,
        Channel::PoseRx,
        Channel::PoseRy,
        Channel::PoseRz,
    ];

    /// Column header used by the extractor and the session log.
    pub fn column(self) -> &'static str {
        match self {
            Channel::Au01 => "AU01_r",
            Channel::Au02 => "AU02_r",
            Channel::Au04 => "AU04_r",
            Channel::Au05 => "AU05_r",
            Channel::Au06 => "AU06_r",
            Channel::Au07 => "AU07_r",
            Channel::Au09 => "AU09_r",
            Channel::Au10 => "AU10_r",
            Channel::Au12 => "AU12_r",
            Channel::Au15 => "AU15_r",
            Channel::Au20 => "AU20_r",
            Channel::Au23 => "AU23_r",
            Channel::Au25 => "AU25_r",
            Channel::Au26 => "AU26_r",
            Channel::Au45c => "AU45_c",
            Channel::PoseRx => "pose_Rx",
            Channel::PoseRy => "pose_Ry",
            Channel::PoseRz => "pose_Rz",
        }
    }

    /// Look a channel up by its column header.
    pub fn from_column(name: &str) -> Option<Channel> {
        Self::ALL.iter().copied().find(|c| c.column() == name)
    }

    /// Position in [`Channel::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this is a head-pose channel.
    pub fn is_pose(self) -> bool {
        matches!(self, Channel::PoseRx | Channel::PoseRy | Channel::PoseRz)
    }
}

//! Encoding targets and specs.

use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Highest frame rate a transcode target may request.
pub const MAX_FPS: u32 = 120;

/// Output resolution of a transcode target.
///
/// `Audio` is the zero-height rendition kept for audio-only playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Audio,
    R144,
    R240,
    R360,
    R480,
    R720,
    R1080,
    R1440,
    R2160,
}

impl Resolution {
    /// Pixel height of the rendition (0 for audio-only).
    pub fn height(&self) -> u16 {
        match self {
            Resolution::Audio => 0,
            Resolution::R144 => 144,
            Resolution::R240 => 240,
            Resolution::R360 => 360,
            Resolution::R480 => 480,
            Resolution::R720 => 720,
            Resolution::R1080 => 1080,
            Resolution::R1440 => 1440,
            Resolution::R2160 => 2160,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Audio => "audio",
            Resolution::R144 => "144p",
            Resolution::R240 => "240p",
            Resolution::R360 => "360p",
            Resolution::R480 => "480p",
            Resolution::R720 => "720p",
            Resolution::R1080 => "1080p",
            Resolution::R1440 => "1440p",
            Resolution::R2160 => "2160p",
        }
    }

    /// Resolution for a source of the given pixel height, rounded down to
    /// the nearest supported rendition.
    pub fn from_height(height: u16) -> Self {
        match height {
            0 => Resolution::Audio,
            1..=239 => Resolution::R144,
            240..=359 => Resolution::R240,
            360..=479 => Resolution::R360,
            480..=719 => Resolution::R480,
            720..=1079 => Resolution::R720,
            1080..=1439 => Resolution::R1080,
            1440..=2159 => Resolution::R1440,
            _ => Resolution::R2160,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Resolution::Audio)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Target of a single transcode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EncodingSpec {
    /// Output resolution
    pub resolution: Resolution,

    /// Output frame rate
    #[validate(range(min = 1, max = 120))]
    pub fps: u32,
}

impl EncodingSpec {
    pub fn new(resolution: Resolution, fps: u32) -> Self {
        Self { resolution, fps }
    }
}

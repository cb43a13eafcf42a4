use serde::{Deserialize, Serialize};

/// Metadata extracted once from the WebP container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Frames in one loop. `1` is a still image.
    pub frame_count: u32,
    /// Number of times to play the animation. `0` loops forever.
    pub loop_count: u16,
    pub has_alpha: bool,
    /// Background colour hint of an animation, as reported by the decoder.
    pub background_color: Option<[u8; 4]>,
}

impl ContainerMetadata {
    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    pub fn loops_forever(&self) -> bool {
        self.loop_count == 0
    }

    /// Size in bytes of one 32-bit-per-pixel canvas buffer, if it fits in memory.
    pub fn frame_len(&self) -> Option<usize> {
        (self.canvas_width as usize)
            .checked_mul(self.canvas_height as usize)?
            .checked_mul(4)
    }
}

/// 32-bit output pixel layout delivered to the display sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    #[default]
    Rgba,
    Bgra,
    /// BGRA with colour channels premultiplied by alpha.
    BgraPremultiplied,
}

impl std::str::FromStr for PixelLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgba" => Ok(PixelLayout::Rgba),
            "bgra" => Ok(PixelLayout::Bgra),
            "bgra_premultiplied" | "bgra-premultiplied" | "pbgra" => {
                Ok(PixelLayout::BgraPremultiplied)
            }
            other => Err(format!("Unknown pixel layout '{other}'")),
        }
    }
}

/// State of the pending frame slot filled by background decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameStatus {
    Started = 0,
    Ready = 1,
    Canceled = 2,
    Failed = 3,
}

impl FrameStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => FrameStatus::Ready,
            2 => FrameStatus::Canceled,
            3 => FrameStatus::Failed,
            _ => FrameStatus::Started,
        }
    }
}

/// Why playback stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The loop budget was exhausted, or the still image was shown.
    Finished,
    /// A frame failed to decode.
    DecodeFailed,
    /// The display target went away.
    TargetExpired,
    /// The engine was torn down.
    Disposed,
}

/// Point-in-time view of the playback state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub loop_index: u32,
    pub current_timestamp_ms: u64,
    pub current_duration_ms: u64,
    pub frames_presented: u64,
    pub status: FrameStatus,
    pub stopped: Option<StopReason>,
}

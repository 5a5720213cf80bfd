//! Shared value types used across the decoder pipeline.

use serde::Serialize;
use std::time::Duration;

/// Category of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Video,
    Audio,
    Subtitle,
    Data,
    Unknown,
}

/// Ticks are the clock's native unit (microseconds since an arbitrary
/// stream-local origin). `None` stands for "undated".
pub type Tick = i64;

/// `i_preroll_end` sentinels.
pub const PREROLL_NONE: Tick = Tick::MIN;
pub const PREROLL_FORCED: Tick = Tick::MAX;

/// Playback input type, set once at decoder creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Playback,
    Thumbnail,
}

/// Dolby Surround override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DolbySurround {
    Auto,
    On,
    Off,
}

/// CC decoder preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcPreference {
    Cea608,
    Cea708,
}

/// Pending reload request. `ReloadDecoderAndAudioOutput`
/// is the stronger variant and always wins a compare-and-set race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadRequest {
    None,
    ReloadDecoder,
    ReloadDecoderAndAudioOutput,
}

impl ReloadRequest {
    fn rank(self) -> u8 {
        match self {
            ReloadRequest::None => 0,
            ReloadRequest::ReloadDecoder => 1,
            ReloadRequest::ReloadDecoderAndAudioOutput => 2,
        }
    }

    /// Merge a newly requested reload with whatever is already pending,
    /// keeping the stronger of the two.
    pub fn merge(self, other: ReloadRequest) -> ReloadRequest {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Minimal hand-rolled bitflags: plain associated consts + bitwise ops
/// rather than pulling in a dedicated crate for four bits.
macro_rules! bitflags_like {
    ($(#[$meta:meta])*
     pub struct $name:ident {
        $(const $flag:ident = $value:expr;)*
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u8);

        impl $name {
            $(pub const $flag: Self = Self($value);)*

            pub fn empty() -> Self {
                Self(0)
            }

            pub fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like! {
    /// Per-unit flags.
    pub struct UnitFlags {
        const PREROLL = 1 << 0;
        const DISCONTINUITY = 1 << 1;
        const CORRUPTED = 1 << 2;
        const PRIVATE_RELOADED = 1 << 3;
    }
}

/// A compressed input unit as produced by the demultiplexer.
#[derive(Debug, Clone)]
pub struct Unit {
    pub payload: Vec<u8>,
    pub pts: Option<Tick>,
    pub dts: Option<Tick>,
    pub flags: UnitFlags,
}

impl Unit {
    pub fn new(payload: Vec<u8>, pts: Option<Tick>, dts: Option<Tick>) -> Self {
        Self {
            payload,
            pts,
            dts,
            flags: UnitFlags::empty(),
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// `dts ∨ pts`, used by preroll tracking.
    pub fn ordering_ts(&self) -> Option<Tick> {
        self.dts.or(self.pts)
    }
}

/// Decoded-picture or decoded-audio-block output result returned by a codec
/// invocation. Sum type replacing the legacy integer return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderResult {
    Success,
    Critical,
    Reload,
}

/// Audio stream feedback after a block is pushed (`play_audio`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStreamResult {
    Ok,
    Changed,
    Failed,
}

/// Result of asking the resource manager for a video sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoutState {
    NotChanged,
    Started,
    Stopped,
}

/// Identity fields of the active elementary-stream format, carried
/// through to a lazily-created stream-output muxer input
/// (group id, track id, language).
#[derive(Debug, Clone, Default)]
pub struct EsMeta {
    pub group_id: i32,
    pub track_id: i32,
    pub language: Option<String>,
}

/// A-to-B loop marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopMarker {
    pub time: Tick,
    pub pos: u64,
    pub set: bool,
}

/// Optional out-parameter for `enqueue`, reporting whatever changed as a
/// side effect of this push becoming visible to the caller: the
/// negotiated output format drifted since the last check, and/or the
/// active closed-caption descriptor changed. Serializable so embedders
/// that log or ship this status across a process boundary (e.g. a
/// remote-control surface) don't have to hand-roll the wire shape.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueStatus {
    pub format_changed: bool,
    pub new_cc_desc: Option<Vec<crate::subdecoder::CcStreamFormat>>,
}

/// Timeout used by the subtitle sink polling loop.
pub const SUBTITLE_WAIT_POLLS: u32 = 30;
pub const SUBTITLE_WAIT_INTERVAL: Duration = Duration::from_millis(200);

/// Hard FIFO byte ceiling for unpaced enqueue.
pub const DEFAULT_FIFO_BYTE_CEILING: usize = 400 * 1024 * 1024;

/// FIFO count threshold used to unblock a paced enqueue.
pub const FIFO_PACE_COUNT: usize = 10;

//! Sink and resource-manager interfaces consumed by the decoder.
//! The sinks themselves (audio output, video display, SPU
//! compositor) and the pool that owns them are external collaborators;
//! this module only defines the seam plus the reference test doubles used
//! by the pipeline's own unit tests.

use crate::types::{AudioStreamResult, Tick, VoutState};

/// Picture/audio-block output queued to a sink.
#[derive(Debug, Clone)]
pub struct Output {
    pub pts: Option<Tick>,
    pub payload: Vec<u8>,
    pub still: bool,
    pub force_display: bool,
}

/// Minimal video sink surface the negotiator and worker loop drive.
pub trait VideoSink: Send {
    fn queue(&mut self, picture: Output);
    fn flush(&mut self);
    fn flush_up_to(&mut self, pts: Tick);
    fn is_empty(&self) -> bool;
    fn change_pause(&mut self, paused: bool, date: i64);
    fn change_rate(&mut self, rate: f32);
    fn change_delay(&mut self, delay: Tick);
    fn next_queued(&mut self) -> Option<Output>;
    fn stats(&self) -> VideoStats;

    /// `SetVoutMouseEvent`: registers (or clears, with `None`) the mouse
    /// event callback forwarded from the display.
    fn set_mouse_handler(&mut self, _handler: Option<MouseHandler>) {}

    /// `SetVbiPage`/`SetVbiOpaque`: teletext/VBI controls, meaningful
    /// only for sinks overlaying a teletext-capable subpicture channel.
    fn set_vbi_page(&mut self, _page: u16) {}
    fn set_vbi_opaque(&mut self, _opaque: bool) {}
}

/// A mouse event forwarded from the video display, in picture space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub x: i32,
    pub y: i32,
    pub button_mask: u8,
}

pub type MouseHandler = Box<dyn FnMut(MouseEvent) + Send>;

#[derive(Debug, Clone, Copy, Default)]
pub struct VideoStats {
    pub decoded: u64,
    pub lost: u64,
    pub displayed: u64,
    pub late: u64,
}

/// Minimal audio stream surface (bound to an audio output by the
/// resource manager).
pub trait AudioStream: Send {
    fn queue(&mut self, block: Output) -> AudioStreamResult;
    fn flush(&mut self);
    fn drain(&mut self);
    fn is_empty(&self) -> bool;
    fn change_pause(&mut self, paused: bool, date: i64);
    fn change_rate(&mut self, rate: f32);
    fn change_delay(&mut self, delay: Tick);
}

/// Opaque handle to an audio output device, held but not interpreted by
/// the decoder.
pub trait AudioOutput: Send {}

/// Subpicture channel registered on a video sink.
pub trait SubtitleChannel: Send {
    fn queue(&mut self, subpicture: Output, order: u64);
    fn change_delay(&mut self, delay: Tick);
}

/// Configuration passed to `request_vout` describing the target format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub visible_width: u32,
    pub visible_height: u32,
    pub chroma: u32,
    pub sar_num: u32,
    pub sar_den: u32,
    pub orientation: u8,
    pub multiview_mode: u8,
}

/// Effective audio format, negotiated and partially echoed back by the
/// codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub bytes_per_frame: u32,
    pub sample_format: u32,
    pub channel_layout: u64,
    pub profile: u32,
    pub replay_gain_source: u32,
}

/// The pool that owns sinks; the decoder borrows and returns them.
pub trait ResourceManager: Send + Sync {
    fn get_aout(&self) -> Option<Box<dyn AudioOutput>>;
    fn put_aout(&self, aout: Box<dyn AudioOutput>);

    /// `pool_size` is the picture-pool size the negotiator computed from
    /// the codec's DPB family (`negotiate::dpb_for_codec`), already
    /// including the sink-hold and prev-frame-hold buffers.
    fn request_vout(&self, format: VideoFormat, pool_size: u32) -> Option<Box<dyn VideoSink>>;
    fn put_vout(&self, sink: Box<dyn VideoSink>) -> VoutState;
    fn hold_vout(&self, sink: &dyn VideoSink);

    fn create_audio_stream(
        &self,
        aout: &dyn AudioOutput,
        format: AudioFormat,
    ) -> Option<Box<dyn AudioStream>>;

    /// Poll-based subtitle buffer allocation: requires a live video sink
    /// to overlay on, which the resource manager tracks itself (the
    /// subtitle decoder does not own one). A real implementation might
    /// prefer a condvar over polling, but the seam here is a fallible,
    /// idempotent single poll so the pipeline owns the retry loop and
    /// timing (`negotiate::SubtitleNegotiator`).
    fn poll_subtitle_channel(&self) -> Option<Box<dyn SubtitleChannel>>;
}

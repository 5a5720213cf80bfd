//! Owner callback set. Fired by the decoder; some from the
//! worker thread, some from the calling thread — callers should not
//! assume a particular thread identity.

use crate::resource::VideoSink;
use crate::types::Tick;

/// Events fired toward the decoder's owner (the input thread / demux
/// layer in the real engine).
pub trait DecoderEvents: Send + Sync {
    fn on_thumbnail_ready(&self, _picture: &crate::resource::Output) {}

    fn on_new_video_stats(&self, _decoded: u64, _lost: u64, _displayed: u64, _late: u64) {}

    fn on_new_audio_stats(&self, _decoded: u64, _lost: u64, _played: u64) {}

    fn on_vout_started(&self, _sink: &dyn VideoSink, _order: i32) {}

    fn on_vout_stopped(&self, _sink: &dyn VideoSink) {}

    fn on_output_paused(&self, _paused: bool, _date: i64) {}

    fn frame_next_status(&self, _err: i32) {}

    fn frame_previous_status(&self, _err: i32) {}

    fn frame_previous_seek(
        &self,
        _pts: Tick,
        _frame_rate_num: u32,
        _frame_rate_den: u32,
        _steps: u32,
        _failed: bool,
    ) {
    }

    fn frame_next_need_data(&self, _waiting: bool) {}

    /// Synchronous pull from the owner; negative return means "not
    /// available" (`get_attachments`).
    fn get_attachments(&self) -> i32 {
        -1
    }

    fn on_error_changed(&self, _category: crate::types::Category, _has_error: bool) {}
}

/// A no-op implementation, handy for tests and for categories that have
/// opted out of all notifications.
#[derive(Default)]
pub struct NullEvents;

impl DecoderEvents for NullEvents {}

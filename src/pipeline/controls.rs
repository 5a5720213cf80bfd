//! Public façade operations, thread-safe and callable from any thread.

use std::time::Duration;

use crate::error::DecoderError;
use crate::resource::MouseHandler;
use crate::subdecoder::{CcChannelSink, CcStreamFormat};
use crate::types::{Category, EnqueueStatus, ReloadRequest, Tick, Unit, PREROLL_NONE};

use super::worker;
use super::InputDecoder;

impl InputDecoder {
    /// `enqueue`. When `status` is given, it is filled in with whatever
    /// drifted as a side effect of this push becoming visible: the
    /// negotiated output format (video or audio) and/or the active
    /// closed-caption descriptor, each reported at most once per change.
    pub fn enqueue(&self, unit: Option<Unit>, do_pace: bool, status: Option<&mut EnqueueStatus>) {
        let shared = &self.shared;
        let mut unit = unit;

        {
            let mut state = shared.state.lock().unwrap();

            if !do_pace {
                if let Some(u) = &unit {
                    if state.fifo.byte_size() + u.size() > shared.config.fifo_byte_ceiling {
                        log::warn!(
                            "decoder {}: fifo full ({} bytes), dropping backlog",
                            shared.id,
                            state.fifo.byte_size()
                        );
                        state.fifo.drain_all();
                        if let Some(u) = unit.as_mut() {
                            u.flags.insert(crate::types::UnitFlags::DISCONTINUITY);
                        }
                    }
                }
            } else {
                while state.fifo.count() >= crate::types::FIFO_PACE_COUNT && !state.waiting {
                    state = shared.cond_fifo.wait(state).unwrap();
                }
            }

            state.fifo.push(unit);
            shared.cond_request.notify_all();
        }

        if self.is_synchronous() {
            worker::drain_synchronous_queue(shared);
        }

        if let Some(status) = status {
            status.format_changed = shared
                .format_dirty
                .swap(false, std::sync::atomic::Ordering::Relaxed);
            status.new_cc_desc = self.get_cc_desc();

            if status.format_changed || status.new_cc_desc.is_some() {
                match serde_json::to_string(&status) {
                    Ok(json) => log::debug!("decoder {}: enqueue status {}", shared.id, json),
                    Err(err) => log::warn!("decoder {}: failed to trace enqueue status: {}", shared.id, err),
                }
            }
        }
    }

    /// `drain`.
    pub fn drain(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.draining = true;
            self.shared.cond_request.notify_all();
        }
        if self.is_synchronous() {
            self.enqueue(None, false, None);
        }
    }

    /// `flush`.
    pub fn flush(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock().unwrap();
        state.fifo.drain_all();
        state.flushing = true;
        state.draining = false;

        if state.paused
            && matches!(shared.category, Category::Video | Category::Subtitle)
            && state.countdown == 0
        {
            state.countdown = 1;
        }

        if state.waiting {
            state.has_data = false;
            shared.cond_acknowledge.notify_all();
        }

        shared.cond_request.notify_all();
        shared.cond_fifo.notify_all();

        if self.is_synchronous() {
            drop(state);
            worker::run_flush_synchronous(shared);
        }
    }

    /// `change_pause`.
    pub fn change_pause(&self, paused: bool, date: i64) {
        let mut state = self.shared.state.lock().unwrap();
        state.paused = paused;
        state.paused_date = date;
        state.countdown = 0;
        self.shared.cond_request.notify_all();
    }

    /// `change_rate`.
    pub fn change_rate(&self, rate: f32) {
        debug_assert!(rate > 0.0, "rate must be positive");
        let mut state = self.shared.state.lock().unwrap();
        state.rate = rate;
        self.shared.cond_request.notify_all();
    }

    /// `change_delay`.
    pub fn change_delay(&self, delay: Tick) {
        let mut state = self.shared.state.lock().unwrap();
        state.delay = delay;
        self.shared.cond_request.notify_all();
    }

    /// `start_wait`.
    pub fn start_wait(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.has_data = false;
        state.first = true;
        state.waiting = true;
        self.shared.cond_request.notify_all();
    }

    /// `stop_wait`.
    pub fn stop_wait(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.waiting = false;
        self.shared.cond_request.notify_all();
    }

    /// `wait`: blocks until data is seen, the decoder is paused, or the
    /// "buffer deadlock prevented" condition fires.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.has_data && !state.paused && !(state.idle && state.fifo.is_empty()) {
            state = self.shared.cond_acknowledge.wait(state).unwrap();
        }
        if state.idle && state.fifo.is_empty() && !state.has_data && !state.paused {
            log::debug!("decoder {}: buffer deadlock prevented", self.shared.id);
        }
    }

    /// `frame_next` (Video only).
    pub fn frame_next(&self) -> Result<(), DecoderError> {
        if self.shared.category != Category::Video {
            return Err(DecoderError::Busy);
        }

        // Never hold `video` and `state` at once (matches the rest of the
        // pipeline's locking discipline) to avoid an AB-BA deadlock against
        // the worker's pause mirror, which locks the same two mutexes.
        let mut video = self.shared.video.lock().unwrap();
        if video.sink.is_none() {
            return Err(DecoderError::Busy);
        }
        let sink_empty = video.sink.as_ref().unwrap().is_empty();
        drop(video);

        {
            let mut state = self.shared.state.lock().unwrap();
            if state.video_drained && sink_empty {
                return Err(DecoderError::Again);
            }
            state.countdown = state
                .countdown
                .checked_add(1)
                .ok_or(DecoderError::Invalid)?;
        }

        {
            let mut prev_frame = self.shared.prev_frame.lock().unwrap();
            prev_frame.reset();
        }

        let paused = self.shared.state.lock().unwrap().paused;
        if paused {
            let mut video = self.shared.video.lock().unwrap();
            if let Some(picture) = video.sink.as_mut().unwrap().next_queued() {
                video.sink.as_mut().unwrap().queue(picture);
                drop(video);
                self.shared.state.lock().unwrap().countdown -= 1;
                self.shared.events.frame_next_status(0);
            }
        }

        Ok(())
    }

    /// `frame_previous` (Video only).
    pub fn frame_previous(&self) -> Result<(), DecoderError> {
        if self.shared.category != Category::Video {
            return Err(DecoderError::Busy);
        }

        let mut video = self.shared.video.lock().unwrap();
        if video.sink.is_none() {
            return Err(DecoderError::Busy);
        }
        video.sink.as_mut().unwrap().flush();
        drop(video);

        let seek = {
            let mut prev_frame = self.shared.prev_frame.lock().unwrap();
            prev_frame.request()
        };

        if let Some(req) = seek {
            let last_pts = self
                .shared
                .state
                .lock()
                .unwrap()
                .last_displayed_pts
                .unwrap_or(0);
            self.shared
                .events
                .frame_previous_seek(last_pts, 0, 0, req.steps, req.failed);
        }

        Ok(())
    }

    /// `is_empty`.
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.fifo.is_empty()
    }

    /// `is_drained`.
    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        if state.draining {
            return false;
        }
        match self.shared.category {
            Category::Audio => {
                let audio = self.shared.audio.lock().unwrap();
                audio
                    .stream
                    .as_ref()
                    .map(|s| s.is_empty())
                    .unwrap_or(true)
            }
            Category::Video => {
                let video = self.shared.video.lock().unwrap();
                video.sink.as_ref().map(|s| s.is_empty()).unwrap_or(true)
            }
            _ => true,
        }
    }

    /// Explicit reload trigger, used by the reload-on-format-change paths
    /// outside the worker loop itself.
    pub(crate) fn request_reload(&self, request: ReloadRequest) {
        self.shared.request_reload(request);
    }

    /// Reset preroll to `PREROLL_NONE`, used on flush/restart.
    pub fn reset_preroll(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.preroll_end = PREROLL_NONE;
    }

    pub fn set_ab_loop(&self, a: Option<(Tick, u64)>, b: Option<(Tick, u64)>) {
        let mut state = self.shared.state.lock().unwrap();
        state.loop_a = a
            .map(|(time, pos)| crate::types::LoopMarker { time, pos, set: true })
            .unwrap_or_default();
        state.loop_b = b
            .map(|(time, pos)| crate::types::LoopMarker { time, pos, set: true })
            .unwrap_or_default();
    }

    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while !self.is_drained() {
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// `GetCcDesc`: the active 608/708 channels, re-emitted only when the
    /// descriptor has changed since the last call (§4.3).
    pub fn get_cc_desc(&self) -> Option<Vec<CcStreamFormat>> {
        let desc = (*self.shared.last_cc_desc.lock().unwrap())?;
        self.shared.cc_cache.lock().unwrap().get_cc_desc(desc)
    }

    /// `CreateSubDec`: registers a child closed-caption decoder for
    /// `channel`, linked into this decoder's sub-decoder list.
    pub fn create_sub_decoder(&self, channel: u8, sink: Box<dyn CcChannelSink>) {
        self.shared.sub_decoders.create(channel, sink);
    }

    /// `RemoveSubDec`. Must be called before the sub-decoder's own worker
    /// is joined (invariant 6, §3).
    pub fn remove_sub_decoder(&self, channel: u8) {
        self.shared.sub_decoders.remove(channel);
    }

    /// `SetCcState`: enables or disables decoding of one CC channel.
    /// Disabled channels are masked out of every subsequent `PlayCc`.
    pub fn set_cc_state(&self, channel: u8, enabled: bool) {
        let mut mask = self.shared.cc_enabled.lock().unwrap();
        if enabled {
            *mask |= 1u64 << channel;
        } else {
            *mask &= !(1u64 << channel);
        }
    }

    /// `GetCcState`.
    pub fn get_cc_state(&self, channel: u8) -> bool {
        (*self.shared.cc_enabled.lock().unwrap() & (1u64 << channel)) != 0
    }

    /// `SetVoutMouseEvent`: registers (or clears, with `None`) the mouse
    /// event callback on the negotiated video sink. Video-category only.
    pub fn set_vout_mouse_event(&self, handler: Option<MouseHandler>) {
        if self.shared.category != Category::Video {
            return;
        }
        let mut video = self.shared.video.lock().unwrap();
        if let Some(sink) = video.sink.as_mut() {
            sink.set_mouse_handler(handler);
        }
    }

    /// `SetVbiPage`.
    pub fn set_vbi_page(&self, page: u16) {
        if self.shared.category != Category::Video {
            return;
        }
        let mut video = self.shared.video.lock().unwrap();
        if let Some(sink) = video.sink.as_mut() {
            sink.set_vbi_page(page);
        }
    }

    /// `SetVbiOpaque`.
    pub fn set_vbi_opaque(&self, opaque: bool) {
        if self.shared.category != Category::Video {
            return;
        }
        let mut video = self.shared.video.lock().unwrap();
        if let Some(sink) = video.sink.as_mut() {
            sink.set_vbi_opaque(opaque);
        }
    }
}

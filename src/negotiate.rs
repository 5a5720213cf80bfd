//! Output negotiators: detect when the codec's declared
//! output format has drifted from the cached one and reconfigure or
//! tear down/recreate the sink accordingly.

use crate::config::Config;
use crate::events::DecoderEvents;
use crate::resource::{
    AudioFormat, AudioOutput, AudioStream, ResourceManager, SubtitleChannel, VideoFormat,
    VideoSink,
};
use crate::types::DolbySurround;

/// Picture pool sizing by codec family, plus the fixed sink-hold and
/// prev-frame-hold buffers.
pub fn dpb_for_codec(dpb_hint: Option<u32>, extra_buffers: u32) -> u32 {
    let base = dpb_hint.unwrap_or(2);
    base + 1 /* sink hold */ + 1 /* prev-frame/filter hold */ + extra_buffers
}

/// Cached audio format plus the live stream/output pair. Invariant: the
/// output is `Some` iff the stream is `Some`.
pub struct AudioNegotiator {
    cached_format: Option<AudioFormat>,
    pub stream: Option<Box<dyn AudioStream>>,
    pub output: Option<Box<dyn AudioOutput>>,
}

impl AudioNegotiator {
    pub fn new() -> Self {
        Self {
            cached_format: None,
            stream: None,
            output: None,
        }
    }

    fn apply_dolby_override(mut format: AudioFormat, config: &Config) -> AudioFormat {
        match config.force_dolby_surround {
            DolbySurround::On => format.channel_layout |= DOLBY_STEREO_FLAG,
            DolbySurround::Off => format.channel_layout &= !DOLBY_STEREO_FLAG,
            DolbySurround::Auto => {}
        }
        format
    }

    /// `update_audio_format`. Returns the effective (post-Dolby-override)
    /// format plus whether the stream/output pair was actually
    /// torn down and recreated, mirroring `VideoNegotiator::update`.
    pub fn update(
        &mut self,
        new_format: AudioFormat,
        config: &Config,
        resources: &dyn ResourceManager,
    ) -> Result<(AudioFormat, bool), crate::error::DecoderError> {
        if self.stream.is_some() {
            let cached = self.cached_format.expect("stream implies cached format");
            if cached != new_format {
                self.teardown(resources);
            } else {
                return Ok((cached, false));
            }
        }

        let target = Self::apply_dolby_override(new_format, config);

        let output = resources
            .get_aout()
            .ok_or(crate::error::DecoderError::NoSinkAvailable)?;
        let stream = resources
            .create_audio_stream(output.as_ref(), target)
            .ok_or(crate::error::DecoderError::NoSinkAvailable)?;

        self.output = Some(output);
        self.stream = Some(stream);
        self.cached_format = Some(target);
        Ok((target, true))
    }

    pub fn teardown(&mut self, resources: &dyn ResourceManager) {
        self.stream = None;
        if let Some(output) = self.output.take() {
            resources.put_aout(output);
        }
        self.cached_format = None;
    }
}

impl Default for AudioNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit used (conceptually) to force Dolby-stereo channel mode on/off;
/// the exact bit layout is owned by the external audio format type in
/// the full engine, represented here as a single flag bit for the seam.
const DOLBY_STEREO_FLAG: u64 = 1 << 63;

/// Cached video format plus the live sink. Also tracks mastering-display
/// and content-light-level metadata so those can be refreshed even when
/// the sink itself doesn't need to change.
pub struct VideoNegotiator {
    cached_format: Option<VideoFormat>,
    mastering_display_id: u64,
    content_light_level_id: u64,
    pub sink: Option<Box<dyn VideoSink>>,
    pub order: Option<i32>,
}

impl VideoNegotiator {
    pub fn new() -> Self {
        Self {
            cached_format: None,
            mastering_display_id: 0,
            content_light_level_id: 0,
            sink: None,
            order: None,
        }
    }

    fn needs_new_sink(&self, format: &VideoFormat) -> bool {
        match &self.cached_format {
            None => true,
            Some(cached) => cached != format,
        }
    }

    /// `update_video_format`. Returns whether a new sink was
    /// (re)created, so the worker can fire `on_vout_stopped`/
    /// `on_vout_started` in order. `dpb_hint`/`extra_buffers` size the
    /// picture pool per the codec-family DPB table (§4.2).
    pub fn update(
        &mut self,
        format: VideoFormat,
        dpb_hint: Option<u32>,
        extra_buffers: u32,
        mastering_display_id: u64,
        content_light_level_id: u64,
        events: &dyn DecoderEvents,
        resources: &dyn ResourceManager,
    ) -> Result<bool, crate::error::DecoderError> {
        let recreate = self.needs_new_sink(&format);

        if recreate {
            if let Some(old) = self.sink.take() {
                events.on_vout_stopped(old.as_ref());
                resources.put_vout(old);
            }
            let pool_size = dpb_for_codec(dpb_hint, extra_buffers);
            let sink = resources
                .request_vout(format, pool_size)
                .ok_or(crate::error::DecoderError::NoSinkAvailable)?;
            events.on_vout_started(sink.as_ref(), self.order.unwrap_or(0));
            self.sink = Some(sink);
            self.cached_format = Some(format);
        }

        self.mastering_display_id = mastering_display_id;
        self.content_light_level_id = content_light_level_id;

        Ok(recreate)
    }

    pub fn teardown(&mut self, events: &dyn DecoderEvents, resources: &dyn ResourceManager) {
        if let Some(sink) = self.sink.take() {
            events.on_vout_stopped(sink.as_ref());
            resources.put_vout(sink);
        }
        self.cached_format = None;
    }

    /// `get_decoder_device`: only meaningful when hardware
    /// decoding is enabled, and only after ensuring a sink exists.
    pub fn device_hint_enabled(&self, config: &Config) -> bool {
        config.hardware_decoding && self.sink.is_some()
    }
}

impl Default for VideoNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

/// Subtitle channel registration, bound to a live video sink.
#[derive(Default)]
pub struct SubtitleNegotiator {
    pub channel: Option<Box<dyn SubtitleChannel>>,
    pub next_order: u64,
}

impl SubtitleNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// One poll attempt against the resource manager; the sleep-based
    /// pacing across up to `SUBTITLE_WAIT_POLLS` attempts lives in the
    /// caller (the worker loop) since this module must stay free of
    /// concrete timing assumptions for testability. Returns whether a
    /// channel is now registered.
    pub fn try_register(&mut self, resources: &dyn ResourceManager) -> bool {
        self.channel = resources.poll_subtitle_channel();
        self.next_order = 0;
        self.channel.is_some()
    }

    /// Drops the current registration — called when the underlying video
    /// sink changes, per `update_video_format`'s "unregister the previous
    /// subpicture channel" step.
    pub fn unregister(&mut self) {
        self.channel = None;
        self.next_order = 0;
    }

    pub fn next_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEvents;
    use crate::resource::{AudioStream, Output, VideoStats};
    use crate::types::AudioStreamResult;
    use std::sync::Mutex;

    struct FakeAudioOutput;
    impl AudioOutput for FakeAudioOutput {}

    struct FakeAudioStream;
    impl AudioStream for FakeAudioStream {
        fn queue(&mut self, _block: Output) -> AudioStreamResult {
            AudioStreamResult::Ok
        }
        fn flush(&mut self) {}
        fn drain(&mut self) {}
        fn is_empty(&self) -> bool {
            true
        }
        fn change_pause(&mut self, _paused: bool, _date: i64) {}
        fn change_rate(&mut self, _rate: f32) {}
        fn change_delay(&mut self, _delay: crate::types::Tick) {}
    }

    struct FakeVideoSink {
        stats: VideoStats,
    }
    impl VideoSink for FakeVideoSink {
        fn queue(&mut self, _picture: Output) {}
        fn flush(&mut self) {}
        fn flush_up_to(&mut self, _pts: crate::types::Tick) {}
        fn is_empty(&self) -> bool {
            true
        }
        fn change_pause(&mut self, _paused: bool, _date: i64) {}
        fn change_rate(&mut self, _rate: f32) {}
        fn change_delay(&mut self, _delay: crate::types::Tick) {}
        fn next_queued(&mut self) -> Option<Output> {
            None
        }
        fn stats(&self) -> VideoStats {
            self.stats
        }
    }

    struct FakeResources {
        vout_requests: Mutex<u32>,
        vout_puts: Mutex<u32>,
    }

    impl ResourceManager for FakeResources {
        fn get_aout(&self) -> Option<Box<dyn AudioOutput>> {
            Some(Box::new(FakeAudioOutput))
        }
        fn put_aout(&self, _aout: Box<dyn AudioOutput>) {}
        fn request_vout(&self, _format: VideoFormat, _pool_size: u32) -> Option<Box<dyn VideoSink>> {
            *self.vout_requests.lock().unwrap() += 1;
            Some(Box::new(FakeVideoSink {
                stats: VideoStats::default(),
            }))
        }
        fn put_vout(&self, _sink: Box<dyn VideoSink>) -> crate::types::VoutState {
            *self.vout_puts.lock().unwrap() += 1;
            crate::types::VoutState::Stopped
        }
        fn hold_vout(&self, _sink: &dyn VideoSink) {}
        fn create_audio_stream(
            &self,
            _aout: &dyn AudioOutput,
            _format: AudioFormat,
        ) -> Option<Box<dyn AudioStream>> {
            Some(Box::new(FakeAudioStream))
        }
        fn poll_subtitle_channel(&self) -> Option<Box<dyn SubtitleChannel>> {
            None
        }
    }

    fn fmt(w: u32, h: u32) -> VideoFormat {
        VideoFormat {
            width: w,
            height: h,
            visible_width: w,
            visible_height: h,
            chroma: 0,
            sar_num: 1,
            sar_den: 1,
            orientation: 0,
            multiview_mode: 0,
        }
    }

    #[test]
    fn dpb_table_adds_sink_and_prev_frame_hold() {
        assert_eq!(dpb_for_codec(Some(18), 0), 20);
        assert_eq!(dpb_for_codec(Some(8), 0), 10);
        assert_eq!(dpb_for_codec(None, 0), 4);
        assert_eq!(dpb_for_codec(Some(2), 1), 5);
    }

    #[test]
    fn video_negotiator_only_recreates_sink_on_format_drift() {
        let resources = FakeResources {
            vout_requests: Mutex::new(0),
            vout_puts: Mutex::new(0),
        };
        let events = NullEvents;
        let mut negotiator = VideoNegotiator::new();

        let recreated = negotiator
            .update(fmt(1920, 1080), Some(18), 0, 0, 0, &events, &resources)
            .unwrap();
        assert!(recreated);
        assert_eq!(*resources.vout_requests.lock().unwrap(), 1);

        // Same format again: no new sink, no put-back.
        let recreated = negotiator
            .update(fmt(1920, 1080), Some(18), 0, 0, 0, &events, &resources)
            .unwrap();
        assert!(!recreated);
        assert_eq!(*resources.vout_requests.lock().unwrap(), 1);

        // Format drift: tear down then request a new sink.
        let recreated = negotiator
            .update(fmt(1280, 720), Some(18), 0, 0, 0, &events, &resources)
            .unwrap();
        assert!(recreated);
        assert_eq!(*resources.vout_requests.lock().unwrap(), 2);
        assert_eq!(*resources.vout_puts.lock().unwrap(), 1);
    }

    #[test]
    fn audio_negotiator_enforces_output_stream_invariant() {
        let resources = FakeResources {
            vout_requests: Mutex::new(0),
            vout_puts: Mutex::new(0),
        };
        let mut negotiator = AudioNegotiator::new();
        assert!(negotiator.output.is_none() == negotiator.stream.is_none());

        let (_, recreated) = negotiator
            .update(
                AudioFormat {
                    bytes_per_frame: 4,
                    sample_format: 0,
                    channel_layout: 0b11,
                    profile: 0,
                    replay_gain_source: 0,
                },
                &Config::default(),
                &resources,
            )
            .unwrap();
        assert!(recreated);
        assert!(negotiator.output.is_some() && negotiator.stream.is_some());

        negotiator.teardown(&resources);
        assert!(negotiator.output.is_none() && negotiator.stream.is_none());
    }
}

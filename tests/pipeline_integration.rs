//! End-to-end tests driving `InputDecoder` against in-memory fakes for
//! every external collaborator trait. Exercises the worker loop itself,
//! which the module-level unit tests don't reach.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use indec_core::clock::TestClock;
use indec_core::codec::{Codec, CodecOutputs};
use indec_core::events::DecoderEvents;
use indec_core::resource::{
    AudioFormat, AudioOutput, AudioStream, MouseHandler, Output, ResourceManager, SubtitleChannel,
    VideoFormat, VideoSink, VideoStats,
};
use indec_core::types::{Category, DecoderResult, EsMeta, InputType, Tick, Unit, UnitFlags};
use indec_core::{Config, CreateArgs, InputDecoder};

fn poll_until<F: FnMut() -> bool>(mut cond: F, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn unit_at(pts: Tick, payload_len: usize) -> Unit {
    Unit::new(vec![0u8; payload_len.max(1)], Some(pts), Some(pts))
}

fn video_format(tag: u32) -> VideoFormat {
    VideoFormat {
        width: 640 + tag,
        height: 480,
        visible_width: 640 + tag,
        visible_height: 480,
        chroma: 0,
        sar_num: 1,
        sar_den: 1,
        orientation: 0,
        multiview_mode: 0,
    }
}

#[derive(Default)]
struct RecordingEvents {
    vout_log: Mutex<Vec<&'static str>>,
    frame_next_status: Mutex<Vec<i32>>,
    frame_previous_status: Mutex<Vec<i32>>,
    frame_previous_seek: Mutex<Vec<(Tick, u32, bool)>>,
}

impl DecoderEvents for RecordingEvents {
    fn on_vout_started(&self, _sink: &dyn VideoSink, _order: i32) {
        self.vout_log.lock().unwrap().push("started");
    }

    fn on_vout_stopped(&self, _sink: &dyn VideoSink) {
        self.vout_log.lock().unwrap().push("stopped");
    }

    fn frame_next_status(&self, err: i32) {
        self.frame_next_status.lock().unwrap().push(err);
    }

    fn frame_previous_status(&self, err: i32) {
        self.frame_previous_status.lock().unwrap().push(err);
    }

    fn frame_previous_seek(
        &self,
        pts: Tick,
        _frame_rate_num: u32,
        _frame_rate_den: u32,
        steps: u32,
        failed: bool,
    ) {
        self.frame_previous_seek
            .lock()
            .unwrap()
            .push((pts, steps, failed));
    }
}

#[derive(Default)]
struct FakeVideoSinkState {
    queued: Vec<Output>,
    flush_count: u32,
}

struct FakeVideoSink {
    state: Arc<Mutex<FakeVideoSinkState>>,
}

impl VideoSink for FakeVideoSink {
    fn queue(&mut self, picture: Output) {
        self.state.lock().unwrap().queued.push(picture);
    }
    fn flush(&mut self) {
        self.state.lock().unwrap().flush_count += 1;
    }
    fn flush_up_to(&mut self, _pts: Tick) {}
    fn is_empty(&self) -> bool {
        true
    }
    fn change_pause(&mut self, _paused: bool, _date: i64) {}
    fn change_rate(&mut self, _rate: f32) {}
    fn change_delay(&mut self, _delay: Tick) {}
    fn next_queued(&mut self) -> Option<Output> {
        None
    }
    fn stats(&self) -> VideoStats {
        VideoStats::default()
    }
    fn set_mouse_handler(&mut self, _handler: Option<MouseHandler>) {}
}

struct FakeAudioOutput;
impl AudioOutput for FakeAudioOutput {}

struct FakeResources {
    sinks: Mutex<Vec<Arc<Mutex<FakeVideoSinkState>>>>,
}

impl FakeResources {
    fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// The state of the most recently created sink, for assertions.
    fn last_sink(&self) -> Arc<Mutex<FakeVideoSinkState>> {
        self.sinks.lock().unwrap().last().unwrap().clone()
    }
}

impl ResourceManager for FakeResources {
    fn get_aout(&self) -> Option<Box<dyn AudioOutput>> {
        Some(Box::new(FakeAudioOutput))
    }
    fn put_aout(&self, _aout: Box<dyn AudioOutput>) {}
    fn request_vout(&self, _format: VideoFormat, _pool_size: u32) -> Option<Box<dyn VideoSink>> {
        let state = Arc::new(Mutex::new(FakeVideoSinkState::default()));
        self.sinks.lock().unwrap().push(state.clone());
        Some(Box::new(FakeVideoSink { state }))
    }
    fn put_vout(&self, _sink: Box<dyn VideoSink>) -> indec_core::types::VoutState {
        indec_core::types::VoutState::Stopped
    }
    fn hold_vout(&self, _sink: &dyn VideoSink) {}
    fn create_audio_stream(
        &self,
        _aout: &dyn AudioOutput,
        _format: AudioFormat,
    ) -> Option<Box<dyn AudioStream>> {
        None
    }
    fn poll_subtitle_channel(&self) -> Option<Box<dyn SubtitleChannel>> {
        None
    }
}

struct FakeVideoCodec {
    format: VideoFormat,
    switch_after: Option<(usize, VideoFormat)>,
    calls: usize,
    seen_flags: Arc<Mutex<Vec<UnitFlags>>>,
}

impl FakeVideoCodec {
    fn new(format: VideoFormat, seen_flags: Arc<Mutex<Vec<UnitFlags>>>) -> Self {
        Self {
            format,
            switch_after: None,
            calls: 0,
            seen_flags,
        }
    }

    fn with_switch(
        format: VideoFormat,
        switch_after: usize,
        switched: VideoFormat,
        seen_flags: Arc<Mutex<Vec<UnitFlags>>>,
    ) -> Self {
        Self {
            format,
            switch_after: Some((switch_after, switched)),
            calls: 0,
            seen_flags,
        }
    }
}

impl Codec for FakeVideoCodec {
    fn decode(&mut self, unit: Option<&Unit>, outputs: &mut CodecOutputs) -> DecoderResult {
        self.calls += 1;
        if let Some(u) = unit {
            self.seen_flags.lock().unwrap().push(u.flags);
            outputs.video.push(Output {
                pts: u.pts,
                payload: vec![],
                still: false,
                force_display: false,
            });
        }
        DecoderResult::Success
    }

    fn declared_format(&self) -> u64 {
        0
    }

    fn video_format(&self) -> Option<VideoFormat> {
        if let Some((after, switched)) = self.switch_after {
            if self.calls > after {
                return Some(switched);
            }
        }
        Some(self.format)
    }
}

struct Harness {
    decoder: InputDecoder,
    events: Arc<RecordingEvents>,
    resources: Arc<FakeResources>,
}

fn build_video_decoder(config: Config, codec: FakeVideoCodec) -> Harness {
    let events = Arc::new(RecordingEvents::default());
    let resources = Arc::new(FakeResources::new());
    let decoder = InputDecoder::new(CreateArgs {
        id: "video-0".to_string(),
        category: Category::Video,
        config,
        clock: TestClock::new(),
        resources: resources.clone(),
        events: events.clone(),
        codec: Box::new(codec),
        packetizer: None,
        synchronous: false,
        es_meta: EsMeta::default(),
        sout: None,
    });
    Harness {
        decoder,
        events,
        resources,
    }
}

#[test]
fn normal_video_playback_queues_pictures_in_order() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::new(video_format(0), seen_flags);
    let harness = build_video_decoder(Config::default(), codec);

    harness.decoder.enqueue(Some(unit_at(10, 4)), false, None);
    harness.decoder.enqueue(Some(unit_at(20, 4)), false, None);
    harness.decoder.enqueue(Some(unit_at(30, 4)), false, None);
    harness.decoder.drain();
    assert!(harness.decoder.wait_until_drained(Duration::from_secs(2)));

    let sink = harness.resources.last_sink();
    let queued = sink.lock().unwrap().queued.clone();
    let pts: Vec<_> = queued.iter().map(|o| o.pts).collect();
    assert_eq!(pts, vec![Some(10), Some(20), Some(30)]);
}

#[test]
fn preroll_boundary_drops_then_flushes_and_resumes() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::new(video_format(0), seen_flags.clone());
    let harness = build_video_decoder(Config::default(), codec);

    let mut preroll_a = unit_at(10, 4);
    preroll_a.flags.insert(UnitFlags::PREROLL);
    let mut preroll_b = unit_at(20, 4);
    preroll_b.flags.insert(UnitFlags::PREROLL);
    let boundary = unit_at(99, 4);

    harness.decoder.enqueue(Some(preroll_a), false, None);
    harness.decoder.enqueue(Some(preroll_b), false, None);
    harness.decoder.enqueue(Some(boundary), false, None);
    harness.decoder.drain();
    assert!(harness.decoder.wait_until_drained(Duration::from_secs(2)));

    let sink = harness.resources.last_sink();
    let state = sink.lock().unwrap();
    let pts: Vec<_> = state.queued.iter().map(|o| o.pts).collect();
    assert_eq!(pts, vec![Some(99)], "only the boundary-crossing unit is queued");
    assert_eq!(state.flush_count, 1, "crossing preroll flushes the sink exactly once");
}

#[test]
fn reload_on_video_format_change_fires_vout_events_in_order() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::with_switch(video_format(0), 1, video_format(1), seen_flags.clone());
    let harness = build_video_decoder(Config::default(), codec);

    harness.decoder.enqueue(Some(unit_at(0, 4)), false, None);
    harness.decoder.enqueue(Some(unit_at(1, 4)), false, None);
    harness.decoder.drain();
    assert!(harness.decoder.wait_until_drained(Duration::from_secs(2)));

    let log = harness.events.vout_log.lock().unwrap().clone();
    assert_eq!(log, vec!["started", "stopped", "started"]);
}

#[test]
fn step_by_frame_while_paused_services_countdown() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::new(video_format(0), seen_flags.clone());
    let harness = build_video_decoder(Config::default(), codec);

    harness.decoder.change_pause(true, 0);
    harness.decoder.frame_next().unwrap();
    harness.decoder.enqueue(Some(unit_at(123, 4)), false, None);

    let woke = poll_until(
        || !harness.events.frame_next_status.lock().unwrap().is_empty(),
        Duration::from_secs(2),
    );
    assert!(woke, "frame_next_status should fire once the stepped frame is serviced");
    assert_eq!(*harness.events.frame_next_status.lock().unwrap(), vec![0]);

    let sink = harness.resources.last_sink();
    let pts: Vec<_> = sink.lock().unwrap().queued.iter().map(|o| o.pts).collect();
    assert_eq!(pts, vec![Some(123)]);
}

#[test]
fn frame_previous_emits_seek_request_once() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::new(video_format(0), seen_flags.clone());
    let harness = build_video_decoder(Config::default(), codec);

    // Warm up: get a sink negotiated and one frame displayed so
    // `last_displayed_pts` is populated.
    harness.decoder.enqueue(Some(unit_at(10_000, 4)), false, None);
    harness.decoder.drain();
    assert!(harness.decoder.wait_until_drained(Duration::from_secs(2)));

    harness.decoder.frame_previous().unwrap();
    harness.decoder.frame_previous().unwrap();

    let seeks = harness.events.frame_previous_seek.lock().unwrap().clone();
    assert_eq!(
        seeks.len(),
        1,
        "only the first frame_previous call while no walk is in flight issues a seek"
    );
    let (pts, steps, failed) = seeks[0];
    assert_eq!(pts, 10_000);
    assert_eq!(steps, 1);
    assert!(!failed);
}

#[test]
fn backpressure_chain_release_marks_discontinuity() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::new(video_format(0), seen_flags.clone());
    let config = Config::new(InputType::Playback).with_fifo_byte_ceiling(1);
    let harness = build_video_decoder(config, codec);

    harness.decoder.enqueue(Some(unit_at(0, 16)), false, None);
    harness.decoder.drain();
    assert!(harness.decoder.wait_until_drained(Duration::from_secs(2)));

    let flags = seen_flags.lock().unwrap().clone();
    assert!(
        flags.iter().any(|f| f.contains(UnitFlags::DISCONTINUITY)),
        "a push past the fifo byte ceiling drains the backlog and marks the surviving unit discontinuous"
    );
}

#[test]
fn flush_drops_units_enqueued_before_it() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::new(video_format(0), seen_flags.clone());
    let harness = build_video_decoder(Config::default(), codec);

    harness.decoder.change_pause(true, 0);
    harness.decoder.enqueue(Some(unit_at(1, 4)), false, None);
    harness.decoder.enqueue(Some(unit_at(2, 4)), false, None);
    harness.decoder.enqueue(Some(unit_at(3, 4)), false, None);
    harness.decoder.flush();
    harness.decoder.change_pause(false, 0);
    harness.decoder.enqueue(Some(unit_at(555, 4)), false, None);
    harness.decoder.drain();
    assert!(harness.decoder.wait_until_drained(Duration::from_secs(2)));

    let sink = harness.resources.last_sink();
    let pts: Vec<_> = sink.lock().unwrap().queued.iter().map(|o| o.pts).collect();
    assert_eq!(pts, vec![Some(555)], "units enqueued before the flush never reach the sink");
}

#[test]
fn drain_then_wait_until_drained_reports_true() {
    let seen_flags = Arc::new(Mutex::new(Vec::new()));
    let codec = FakeVideoCodec::new(video_format(0), seen_flags.clone());
    let harness = build_video_decoder(Config::default(), codec);

    harness.decoder.enqueue(Some(unit_at(1, 4)), false, None);
    harness.decoder.enqueue(Some(unit_at(2, 4)), false, None);
    harness.decoder.drain();

    assert!(harness.decoder.wait_until_drained(Duration::from_secs(2)));
    assert!(harness.decoder.is_drained());
}

//! Decoder pipeline & worker loop — the core that connects
//! the FIFO, the worker thread, the optional packetizer, the codec, the
//! scheduling flags and the owner callbacks.

mod controls;
mod process_unit;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::clock::Clock;
use crate::codec::{Codec, Packetizer};
use crate::config::Config;
use crate::events::DecoderEvents;
use crate::fifo::Fifo;
use crate::negotiate::{AudioNegotiator, SubtitleNegotiator, VideoNegotiator};
use crate::prev_frame::PrevFrameHelper;
use crate::resource::ResourceManager;
use crate::sout::{SoutInput, StreamOutput};
use crate::subdecoder::{CcDescriptorCache, SubDecoderList};
use crate::types::{Category, EsMeta, LoopMarker, ReloadRequest, Tick, PREROLL_NONE};

/// All FIFO-adjacent scheduling state, guarded by one mutex.
pub(crate) struct State {
    pub fifo: Fifo,
    pub paused: bool,
    pub paused_date: i64,
    pub output_paused: bool,
    pub rate: f32,
    pub output_rate: f32,
    pub delay: Tick,
    pub output_delay: Tick,
    pub waiting: bool,
    pub has_data: bool,
    pub first: bool,
    pub out_started: bool,
    pub flushing: bool,
    pub draining: bool,
    pub idle: bool,
    pub aborting: bool,
    pub preroll_end: Tick,
    pub countdown: i64,
    pub loop_a: LoopMarker,
    pub loop_b: LoopMarker,
    pub error: bool,
    pub last_displayed_pts: Option<Tick>,
    pub video_started: bool,
    pub video_drained: bool,
}

impl State {
    fn new() -> Self {
        Self {
            fifo: Fifo::new(),
            paused: false,
            paused_date: 0,
            output_paused: false,
            rate: 1.0,
            output_rate: 1.0,
            delay: 0,
            output_delay: 0,
            waiting: false,
            has_data: false,
            first: true,
            out_started: false,
            flushing: false,
            draining: false,
            idle: false,
            aborting: false,
            preroll_end: PREROLL_NONE,
            countdown: 0,
            loop_a: LoopMarker::default(),
            loop_b: LoopMarker::default(),
            error: false,
            last_displayed_pts: None,
            video_started: false,
            video_drained: false,
        }
    }
}

/// Shared state reachable from the worker thread and every façade call.
pub(crate) struct Shared {
    pub id: String,
    pub category: Category,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub resources: Arc<dyn ResourceManager>,
    pub events: Arc<dyn DecoderEvents>,
    pub codec: Mutex<Box<dyn Codec>>,
    pub packetizer: Mutex<Option<Box<dyn Packetizer>>>,
    pub reload: AtomicU8,
    pub video: Mutex<VideoNegotiator>,
    pub audio: Mutex<AudioNegotiator>,
    pub subtitle: Mutex<SubtitleNegotiator>,
    pub prev_frame: Mutex<PrevFrameHelper>,
    pub sub_decoders: SubDecoderList,
    pub cc_cache: Mutex<CcDescriptorCache>,
    /// Per-channel CC enable bitmap consulted by `dispatch_cc`
    /// (`SetCcState`/`GetCcState`); all channels active by default.
    pub cc_enabled: Mutex<u64>,
    pub last_cc_desc: Mutex<Option<crate::codec::CcDescriptor>>,
    pub es_meta: EsMeta,
    /// Present only when this decoder feeds a stream-output muxer
    /// instead of a playback sink (`process_sout`, `src/sout.rs`).
    pub sout: Option<Arc<dyn StreamOutput>>,
    pub sout_input: Mutex<Option<Box<dyn SoutInput>>>,
    pub sout_cc_input: Mutex<Option<Box<dyn SoutInput>>>,
    pub sout_wants_substreams: AtomicBool,
    /// Set whenever `negotiate_video`/`negotiate_audio` (re)creates a
    /// sink; drained (and cleared) by `enqueue`'s optional status block.
    pub format_dirty: AtomicBool,
    pub state: Mutex<State>,
    pub cond_request: Condvar,
    pub cond_acknowledge: Condvar,
    pub cond_fifo: Condvar,
}

fn encode_reload(r: ReloadRequest) -> u8 {
    match r {
        ReloadRequest::None => 0,
        ReloadRequest::ReloadDecoder => 1,
        ReloadRequest::ReloadDecoderAndAudioOutput => 2,
    }
}

fn decode_reload(v: u8) -> ReloadRequest {
    match v {
        1 => ReloadRequest::ReloadDecoder,
        2 => ReloadRequest::ReloadDecoderAndAudioOutput,
        _ => ReloadRequest::None,
    }
}

impl Shared {
    /// Compare-and-merge a reload request: the stronger variant always
    /// wins, implemented as a single atomic whose value is re-derived
    /// under a CAS loop rather than guarded by the FIFO mutex.
    pub fn request_reload(&self, requested: ReloadRequest) {
        let mut current = self.reload.load(Ordering::SeqCst);
        loop {
            let merged = decode_reload(current).merge(requested);
            let merged_encoded = encode_reload(merged);
            if merged_encoded == current {
                return;
            }
            match self.reload.compare_exchange(
                current,
                merged_encoded,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn take_reload(&self) -> ReloadRequest {
        decode_reload(self.reload.swap(0, Ordering::SeqCst))
    }
}

/// One input decoder per elementary stream.
pub struct InputDecoder {
    pub(crate) shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    synchronous: bool,
}

/// Construction parameters.
pub struct CreateArgs {
    pub id: String,
    pub category: Category,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub resources: Arc<dyn ResourceManager>,
    pub events: Arc<dyn DecoderEvents>,
    pub codec: Box<dyn Codec>,
    pub packetizer: Option<Box<dyn Packetizer>>,
    /// Synchronous mode: no worker thread, every operation runs on the
    /// caller (the stream-output "packetizer-only" case).
    pub synchronous: bool,
    /// Identity fields of the active elementary-stream format, echoed
    /// into the muxer input when `sout` is set.
    pub es_meta: EsMeta,
    /// Wires this decoder to a stream-output muxer instead of a playback
    /// sink; implies `synchronous: true` in practice, though the field is
    /// independent so tests can exercise either combination.
    pub sout: Option<Arc<dyn StreamOutput>>,
}

impl InputDecoder {
    pub fn new(args: CreateArgs) -> Self {
        let shared = Arc::new(Shared {
            id: args.id,
            category: args.category,
            config: args.config,
            clock: args.clock,
            resources: args.resources,
            events: args.events,
            codec: Mutex::new(args.codec),
            packetizer: Mutex::new(args.packetizer),
            reload: AtomicU8::new(0),
            video: Mutex::new(VideoNegotiator::new()),
            audio: Mutex::new(AudioNegotiator::new()),
            subtitle: Mutex::new(SubtitleNegotiator::new()),
            prev_frame: Mutex::new(PrevFrameHelper::new()),
            sub_decoders: SubDecoderList::new(),
            cc_cache: Mutex::new(CcDescriptorCache::new()),
            cc_enabled: Mutex::new(u64::MAX),
            last_cc_desc: Mutex::new(None),
            es_meta: args.es_meta,
            sout: args.sout,
            sout_input: Mutex::new(None),
            sout_cc_input: Mutex::new(None),
            sout_wants_substreams: AtomicBool::new(false),
            format_dirty: AtomicBool::new(false),
            state: Mutex::new(State::new()),
            cond_request: Condvar::new(),
            cond_acknowledge: Condvar::new(),
            cond_fifo: Condvar::new(),
        });

        let worker = if args.synchronous {
            None
        } else {
            Some(worker::spawn(shared.clone()))
        };

        Self {
            shared,
            worker: Mutex::new(worker),
            synchronous: args.synchronous,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn category(&self) -> Category {
        self.shared.category
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }
}

impl Drop for InputDecoder {
    /// Deletion: signal `aborting`, join the worker if any, assert the
    /// sub-decoder list is empty, release sinks, empty the FIFO.
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.aborting = true;
            self.shared.cond_fifo.notify_all();
            self.shared.cond_request.notify_all();
            self.shared.cond_acknowledge.notify_all();
        }

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }

        debug_assert!(
            self.shared.sub_decoders.is_empty(),
            "sub-decoders must be removed before their parent is dropped"
        );

        {
            let mut video = self.shared.video.lock().unwrap();
            video.teardown(self.shared.events.as_ref(), self.shared.resources.as_ref());
        }
        {
            let mut audio = self.shared.audio.lock().unwrap();
            audio.teardown(self.shared.resources.as_ref());
        }

        if let Some(sout) = self.shared.sout.as_ref() {
            if let Some(input) = self.shared.sout_input.lock().unwrap().take() {
                sout.remove_input(input);
            }
            if let Some(input) = self.shared.sout_cc_input.lock().unwrap().take() {
                sout.remove_input(input);
            }
        }

        let mut state = self.shared.state.lock().unwrap();
        state.fifo.drain_all();
    }
}

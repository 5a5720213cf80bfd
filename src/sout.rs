//! Stream-output routing (`process_sout`): the synchronous path used
//! when a decoder is constructed against a muxer sink instead of a
//! playback sink. Every packetized unit is forwarded to a lazily-created
//! muxer input instead of being decoded, inheriting the group id, track
//! id and language of the active elementary-stream format.
//!
//! Grounded on `DecoderThread_ProcessSout`/`DecoderSendSubstream` in
//! `examples/original_source/src/input/decoder.c`: the muxer input is
//! created on first packet, and closed-caption side data is forwarded raw
//! on a sibling input named `<id>/cc` only when the muxer declares (via
//! `wants_substreams`) that it wants them.

use crate::types::Unit;

/// Identity carried into the lazily-created muxer input: the group id,
/// track id and language of the decoder's active elementary-stream
/// format (`i_group`/`i_id`/`psz_language` in the source).
#[derive(Debug, Clone, Default)]
pub struct SoutInputConfig {
    pub id: String,
    pub group_id: i32,
    pub track_id: i32,
    pub language: Option<String>,
}

/// One constructed muxer input, owned exclusively by the decoder that
/// created it.
pub trait SoutInput: Send {
    /// Forward one packetized unit; `Err` latches the decoder's `error`
    /// flag per the process-unit protocol ("any muxer-side failure
    /// latches error").
    fn send(&mut self, unit: Unit) -> Result<(), ()>;

    fn flush(&mut self);
}

/// The stream-output muxer itself; out of scope to implement, this trait
/// is the seam the decoder drives.
pub trait StreamOutput: Send + Sync {
    /// Create (or fail to create) a new input bound to `cfg`.
    fn add_input(&self, cfg: &SoutInputConfig) -> Option<Box<dyn SoutInput>>;

    fn remove_input(&self, input: Box<dyn SoutInput>);

    /// `SOUT_STREAM_WANTS_SUBSTREAMS`: whether the muxer wants raw
    /// closed-caption side data forwarded on a sibling input rather than
    /// decoded through a sub-decoder.
    fn wants_substreams(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSoutInput {
        pub sent: Vec<Unit>,
        pub flushed: u32,
        pub fail_next: bool,
    }

    impl SoutInput for RecordingSoutInput {
        fn send(&mut self, unit: Unit) -> Result<(), ()> {
            if self.fail_next {
                return Err(());
            }
            self.sent.push(unit);
            Ok(())
        }

        fn flush(&mut self) {
            self.flushed += 1;
        }
    }

    pub struct RecordingStreamOutput {
        pub wants_substreams: bool,
        pub configs: Mutex<Vec<SoutInputConfig>>,
        pub fail_create: Mutex<bool>,
    }

    impl RecordingStreamOutput {
        pub fn new(wants_substreams: bool) -> Self {
            Self {
                wants_substreams,
                configs: Mutex::new(Vec::new()),
                fail_create: Mutex::new(false),
            }
        }
    }

    impl StreamOutput for RecordingStreamOutput {
        fn add_input(&self, cfg: &SoutInputConfig) -> Option<Box<dyn SoutInput>> {
            self.configs.lock().unwrap().push(cfg.clone());
            if *self.fail_create.lock().unwrap() {
                return None;
            }
            Some(Box::new(RecordingSoutInput::default()))
        }

        fn remove_input(&self, _input: Box<dyn SoutInput>) {}

        fn wants_substreams(&self) -> bool {
            self.wants_substreams
        }
    }
}

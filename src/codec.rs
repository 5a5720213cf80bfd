//! Codec / packetizer interfaces consumed by the decoder.
//! The codec modules themselves are external collaborators; this module
//! defines only the call surface the worker loop drives.

use crate::types::{DecoderResult, Unit};

/// One decode call's worth of outputs, category-tagged by the concrete
/// codec (the pipeline knows which category it is decoding and only
/// consults the matching field).
#[derive(Debug, Default)]
pub struct CodecOutputs {
    pub video: Vec<crate::resource::Output>,
    pub audio: Vec<crate::resource::Output>,
    pub subtitles: Vec<crate::resource::Output>,
}

/// A decoder module instance, owned exclusively by one [`crate::pipeline::InputDecoder`].
/// The contract is that a single instance never receives two
/// concurrent calls from the worker.
pub trait Codec: Send {
    /// Decode one unit (or `None` to drain/flush), appending any produced
    /// outputs to `outputs`.
    fn decode(&mut self, unit: Option<&Unit>, outputs: &mut CodecOutputs) -> DecoderResult;

    /// Declared output format fingerprint, used by the negotiator to
    /// detect drift. Opaque beyond equality for this crate's purposes.
    fn declared_format(&self) -> u64;

    /// Drop and recreate the codec's internal state against its current
    /// input format (§4.1 step 2 / §4.5). Returns `false` if the codec
    /// could not be reinitialized, which latches `TransientCodecError`
    /// (§7) rather than silently carrying on with stale state.
    fn reload(&mut self) -> bool {
        true
    }

    /// Declared DPB family used to size the picture pool; irrelevant for
    /// audio/subtitle codecs.
    fn dpb_hint(&self) -> Option<u32> {
        None
    }

    /// Extra picture buffers the codec needs beyond the DPB table
    /// (filters, deinterlacers); folded into `negotiate::dpb_for_codec`.
    fn extra_picture_buffers(&self) -> u32 {
        0
    }

    /// `format_update`: the codec's current declared video output format,
    /// queried after every `decode` call so the worker can feed it to
    /// [`crate::negotiate::VideoNegotiator::update`]. `None` for
    /// audio/subtitle codecs, or while the codec hasn't seen enough data
    /// to know its output geometry yet.
    fn video_format(&self) -> Option<crate::resource::VideoFormat> {
        None
    }

    /// Mastering-display metadata id; bumped by the codec whenever the
    /// mastering-display side data changes, even if the geometry did not.
    fn mastering_display_id(&self) -> u64 {
        0
    }

    /// Content-light-level metadata id; same idea as
    /// [`Codec::mastering_display_id`].
    fn content_light_level_id(&self) -> u64 {
        0
    }

    /// `format_update`'s audio counterpart.
    fn audio_format(&self) -> Option<crate::resource::AudioFormat> {
        None
    }

    /// Called after a successful [`crate::negotiate::AudioNegotiator::update`]
    /// so the codec can size its buffers against the effective
    /// bytes-per-frame/sample-format the audio output actually granted.
    fn accept_effective_audio_format(&mut self, _format: crate::resource::AudioFormat) {}

    /// Optional closed-caption side channel the codec can expose per
    /// decode call (`queue_cc`). Disabled by the worker whenever the
    /// packetizer already supplies CC (`Packetizer::supports_cc`), to
    /// avoid double delivery.
    fn take_cc(&mut self) -> Option<(Vec<u8>, CcDescriptor)> {
        None
    }
}

/// Closed-caption descriptor: bitmap of active channels plus reorder depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcDescriptor {
    pub channel_bitmap: u64,
    pub reorder_depth: u8,
}

/// A packetizer converts byte-aligned payloads into codec-aligned access
/// units. Only present when the input stream isn't already packetized.
pub trait Packetizer: Send {
    /// Feed one unit, returning zero or more packetized sub-units.
    fn packetize(&mut self, unit: Option<&Unit>) -> Vec<Unit>;

    /// Declared output format fingerprint; used to detect drift against
    /// the codec's declared input format.
    fn declared_format(&self) -> u64;

    /// Whether this packetizer can itself extract closed captions
    /// ("packetizer-driven CC"); when true the codec-driven
    /// `queue_cc` path is disabled to avoid double delivery.
    fn supports_cc(&self) -> bool {
        false
    }

    fn take_cc(&mut self) -> Option<(Vec<u8>, CcDescriptor)> {
        None
    }
}

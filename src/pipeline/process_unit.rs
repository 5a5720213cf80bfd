//! Process-unit protocol. Called with the FIFO lock *not*
//! held by the caller around codec/packetizer/sink calls — this module's
//! functions take `&Shared` and lock only what they need, for exactly as
//! long as they need it.

use crate::codec::{CcDescriptor, CodecOutputs};
use crate::sout::SoutInputConfig;
use crate::types::{Category, DecoderResult, ReloadRequest, Unit, UnitFlags, PREROLL_FORCED};

use super::worker::{play_audio, play_spu, play_video};
use super::Shared;

/// Outcome of processing one unit, used by the worker loop to decide
/// whether to continue, and by tests to assert on latched errors.
pub(super) enum ProcessOutcome {
    Dropped,
    Processed,
    Errored,
}

pub(super) fn process_unit(shared: &Shared, unit: Option<Unit>) -> ProcessOutcome {
    process_unit_inner(shared, unit, /* already_reloaded = */ false)
}

fn process_unit_inner(
    shared: &Shared,
    unit: Option<Unit>,
    already_reloaded: bool,
) -> ProcessOutcome {
    {
        let state = shared.state.lock().unwrap();
        if state.error {
            return ProcessOutcome::Dropped;
        }
    }

    // Consume any pending reload request.
    let pending = shared.take_reload();
    if pending != ReloadRequest::None {
        if !perform_reload(shared, pending) {
            let mut state = shared.state.lock().unwrap();
            state.error = true;
            shared.events.on_error_changed(shared.category, true);
            return ProcessOutcome::Errored;
        }
    }

    let Some(unit) = unit else {
        if shared.sout.is_some() {
            return process_sout_null(shared);
        }
        return process_codec_null(shared);
    };

    if unit.size() == 0 {
        return ProcessOutcome::Dropped;
    }

    update_preroll(shared, &unit);

    if shared.sout.is_some() {
        return process_sout(shared, unit);
    }

    if unit.flags.contains(UnitFlags::PRIVATE_RELOADED) {
        if already_reloaded {
            // A second Reload on an already-marked unit drops it instead
            // of recursing.
            return ProcessOutcome::Dropped;
        }
        return process_through_codec(shared, Some(unit), true, false);
    }

    if let Some(packetizer) = shared.packetizer.lock().unwrap().as_mut() {
        return process_through_packetizer(shared, packetizer.as_mut(), unit);
    }

    process_through_codec(shared, Some(unit), false, false)
}

fn update_preroll(shared: &Shared, unit: &Unit) {
    let mut state = shared.state.lock().unwrap();
    let forces_preroll = unit.flags.contains(UnitFlags::PREROLL)
        || (unit.flags.contains(UnitFlags::DISCONTINUITY)
            && (unit.size() == 0 || unit.flags.contains(UnitFlags::CORRUPTED)));

    if forces_preroll {
        state.preroll_end = PREROLL_FORCED;
    } else if let Some(ts) = unit.ordering_ts() {
        state.preroll_end = state.preroll_end.min(ts);
    }
}

fn process_through_packetizer(
    shared: &Shared,
    packetizer: &mut dyn crate::codec::Packetizer,
    unit: Unit,
) -> ProcessOutcome {
    let codec_format = shared.codec.lock().unwrap().declared_format();
    if packetizer.declared_format() != codec_format {
        // Drain the codec then reload against the new format.
        process_through_codec(shared, None, false, packetizer.supports_cc());
        if !perform_reload(shared, ReloadRequest::ReloadDecoder) {
            let mut state = shared.state.lock().unwrap();
            state.error = true;
            return ProcessOutcome::Errored;
        }
    }

    let packetizer_supplies_cc = packetizer.supports_cc();
    let sub_units = packetizer.packetize(Some(&unit));
    let mut last = ProcessOutcome::Dropped;
    for sub_unit in sub_units {
        last = process_through_codec(shared, Some(sub_unit), false, packetizer_supplies_cc);
    }

    if packetizer_supplies_cc {
        if let Some((block, desc)) = packetizer.take_cc() {
            dispatch_cc(shared, &block, &desc);
        }
    }

    last
}

fn process_through_codec(
    shared: &Shared,
    unit: Option<Unit>,
    reload_guarded: bool,
    packetizer_supplies_cc: bool,
) -> ProcessOutcome {
    let mut outputs = CodecOutputs::default();
    let (result, video_format, mastering_id, cll_id, audio_format, cc) = {
        let mut codec = shared.codec.lock().unwrap();
        let result = codec.decode(unit.as_ref(), &mut outputs);
        let cc = if packetizer_supplies_cc {
            None
        } else {
            codec.take_cc()
        };
        (
            result,
            codec.video_format(),
            codec.mastering_display_id(),
            codec.content_light_level_id(),
            codec.audio_format(),
            cc,
        )
    };

    negotiate_video(shared, video_format, mastering_id, cll_id);
    negotiate_audio(shared, audio_format);
    negotiate_subtitle(shared);

    if let Some((block, desc)) = cc {
        dispatch_cc(shared, &block, &desc);
    }

    dispatch_outputs(shared, outputs);

    match result {
        DecoderResult::Success => ProcessOutcome::Processed,
        DecoderResult::Critical => {
            let mut state = shared.state.lock().unwrap();
            state.error = true;
            shared.events.on_error_changed(shared.category, true);
            ProcessOutcome::Errored
        }
        DecoderResult::Reload => {
            let mut reloaded = unit.unwrap_or_else(|| Unit::new(Vec::new(), None, None));
            reloaded.flags.insert(UnitFlags::PRIVATE_RELOADED);
            process_unit_inner(shared, Some(reloaded), reload_guarded)
        }
    }
}

fn process_codec_null(shared: &Shared) -> ProcessOutcome {
    let packetizer_supplies_cc = shared
        .packetizer
        .lock()
        .unwrap()
        .as_mut()
        .map(|packetizer| {
            packetizer.packetize(None);
            packetizer.supports_cc()
        })
        .unwrap_or(false);
    process_through_codec(shared, None, false, packetizer_supplies_cc)
}

fn dispatch_outputs(shared: &Shared, outputs: CodecOutputs) {
    for picture in outputs.video {
        play_video(shared, picture);
    }
    for block in outputs.audio {
        play_audio(shared, block);
    }
    for subpicture in outputs.subtitles {
        play_spu(shared, subpicture);
    }
}

/// Routes a closed-caption side channel to every subscribed sub-decoder
/// (`PlayCc`, §4.3), after masking out channels the owner disabled via
/// `SetCcState`. Dropped silently if nobody is subscribed.
fn dispatch_cc(shared: &Shared, block: &[u8], desc: &CcDescriptor) {
    *shared.last_cc_desc.lock().unwrap() = Some(*desc);

    let enabled = *shared.cc_enabled.lock().unwrap();
    let masked = CcDescriptor {
        channel_bitmap: desc.channel_bitmap & enabled,
        reorder_depth: desc.reorder_depth,
    };
    shared.sub_decoders.play_cc(block, &masked);
}

/// `update_video_format`: called after every codec decode call; a no-op
/// when the codec hasn't declared an output format yet.
fn negotiate_video(
    shared: &Shared,
    format: Option<crate::resource::VideoFormat>,
    mastering_id: u64,
    cll_id: u64,
) {
    let Some(format) = format else { return };
    let (dpb_hint, extra_buffers) = {
        let codec = shared.codec.lock().unwrap();
        (codec.dpb_hint(), codec.extra_picture_buffers())
    };
    let mut video = shared.video.lock().unwrap();
    match video.update(
        format,
        dpb_hint,
        extra_buffers,
        mastering_id,
        cll_id,
        shared.events.as_ref(),
        shared.resources.as_ref(),
    ) {
        Ok(recreated) => {
            if recreated {
                shared
                    .format_dirty
                    .store(true, std::sync::atomic::Ordering::Relaxed);
            }
        }
        Err(err) => {
            drop(video);
            log::error!("decoder {}: video sink negotiation failed: {}", shared.id, err);
            let mut state = shared.state.lock().unwrap();
            state.error = true;
        }
    }
}

/// `update_audio_format`: mirrors the effective negotiated format back
/// into the codec so it can size its buffers.
fn negotiate_audio(shared: &Shared, format: Option<crate::resource::AudioFormat>) {
    let Some(format) = format else { return };
    let result = {
        let mut audio = shared.audio.lock().unwrap();
        audio.update(format, &shared.config, shared.resources.as_ref())
    };
    match result {
        Ok((effective, recreated)) => {
            shared
                .codec
                .lock()
                .unwrap()
                .accept_effective_audio_format(effective);
            if recreated {
                shared
                    .format_dirty
                    .store(true, std::sync::atomic::Ordering::Relaxed);
            }
        }
        Err(err) => {
            log::error!("decoder {}: audio output negotiation failed: {}", shared.id, err);
            let mut state = shared.state.lock().unwrap();
            state.error = true;
        }
    }
}

/// Subtitle buffer-new: polls the resource pool up to
/// `SUBTITLE_WAIT_POLLS` times with a sleep in between; drops silently
/// (logs) if no video sink to overlay on ever appears.
fn negotiate_subtitle(shared: &Shared) {
    if shared.category != Category::Subtitle {
        return;
    }
    if shared.subtitle.lock().unwrap().channel.is_some() {
        return;
    }
    for attempt in 0..crate::types::SUBTITLE_WAIT_POLLS {
        if shared
            .subtitle
            .lock()
            .unwrap()
            .try_register(shared.resources.as_ref())
        {
            return;
        }
        if attempt + 1 < crate::types::SUBTITLE_WAIT_POLLS {
            std::thread::sleep(crate::types::SUBTITLE_WAIT_INTERVAL);
        }
    }
    log::warn!(
        "decoder {}: no video sink available for subpicture channel, dropping",
        shared.id
    );
}

/// `process_sout`: routes a unit to the stream-output muxer instead of
/// decoding it. Grounded on `DecoderThread_ProcessSout` in
/// `examples/original_source/src/input/decoder.c`.
fn process_sout(shared: &Shared, unit: Unit) -> ProcessOutcome {
    let sub_units = match shared.packetizer.lock().unwrap().as_mut() {
        Some(packetizer) => packetizer.packetize(Some(&unit)),
        None => vec![unit],
    };

    let mut last = ProcessOutcome::Dropped;
    for sub_unit in sub_units {
        last = forward_sout_unit(shared, sub_unit);
        if matches!(last, ProcessOutcome::Errored) {
            return last;
        }
    }

    forward_sout_cc(shared);
    last
}

fn process_sout_null(shared: &Shared) -> ProcessOutcome {
    let sub_units = shared
        .packetizer
        .lock()
        .unwrap()
        .as_mut()
        .map(|packetizer| packetizer.packetize(None))
        .unwrap_or_default();

    let mut last = ProcessOutcome::Dropped;
    for sub_unit in sub_units {
        last = forward_sout_unit(shared, sub_unit);
    }
    last
}

fn forward_sout_unit(shared: &Shared, unit: Unit) -> ProcessOutcome {
    let sout = shared.sout.as_ref().expect("process_sout requires sout");

    let mut guard = shared.sout_input.lock().unwrap();
    if guard.is_none() {
        let cfg = SoutInputConfig {
            id: shared.id.clone(),
            group_id: shared.es_meta.group_id,
            track_id: shared.es_meta.track_id,
            language: shared.es_meta.language.clone(),
        };
        let created = sout.add_input(&cfg);
        if created.is_some() {
            shared
                .sout_wants_substreams
                .store(sout.wants_substreams(), std::sync::atomic::Ordering::Relaxed);
        }
        *guard = created;
    }

    match guard.as_mut() {
        Some(input) => match input.send(unit) {
            Ok(()) => ProcessOutcome::Processed,
            Err(()) => {
                log::error!(
                    "decoder {}: stream output rejected a packetized unit",
                    shared.id
                );
                drop(guard);
                let mut state = shared.state.lock().unwrap();
                state.error = true;
                ProcessOutcome::Errored
            }
        },
        None => {
            log::error!("decoder {}: cannot create stream output input", shared.id);
            drop(guard);
            let mut state = shared.state.lock().unwrap();
            state.error = true;
            ProcessOutcome::Errored
        }
    }
}

/// `DecoderSendSubstream`: forwards raw closed-caption side data to a
/// sibling muxer input named `<id>/cc`, only when the muxer declared it
/// wants substreams.
fn forward_sout_cc(shared: &Shared) {
    if !shared
        .sout_wants_substreams
        .load(std::sync::atomic::Ordering::Relaxed)
    {
        return;
    }

    let packetizer_has_cc = shared
        .packetizer
        .lock()
        .unwrap()
        .as_ref()
        .map(|p| p.supports_cc())
        .unwrap_or(false);
    if !packetizer_has_cc {
        return;
    }

    let cc = shared
        .packetizer
        .lock()
        .unwrap()
        .as_mut()
        .and_then(|p| p.take_cc());
    let Some((block, _desc)) = cc else { return };

    let sout = shared.sout.as_ref().expect("process_sout requires sout");
    let mut guard = shared.sout_cc_input.lock().unwrap();
    if guard.is_none() {
        let cfg = SoutInputConfig {
            id: format!("{}/cc", shared.id),
            group_id: shared.es_meta.group_id,
            track_id: -1,
            language: None,
        };
        *guard = sout.add_input(&cfg);
    }

    if let Some(input) = guard.as_mut() {
        let _ = input.send(Unit::new(block, None, None));
    }
}

/// Reload policy: full teardown/reconstruction of the codec,
/// optionally also the audio output, without tearing down the FIFO.
fn perform_reload(shared: &Shared, request: ReloadRequest) -> bool {
    log::info!("decoder {}: reloading ({:?})", shared.id, request);

    if request == crate::types::ReloadRequest::ReloadDecoderAndAudioOutput {
        let mut audio = shared.audio.lock().unwrap();
        audio.teardown(shared.resources.as_ref());
    }

    let mut codec = shared.codec.lock().unwrap();
    codec.reload()
}

pub(super) fn reset_preroll_after_flush(shared: &Shared) {
    let mut state = shared.state.lock().unwrap();
    state.preroll_end = crate::types::PREROLL_NONE;
}

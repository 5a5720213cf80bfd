//! Worker loop contract plus the category-specific per-frame
//! protocols (`play_video`, `play_audio`, `play_spu`) and the
//! wait-unblock handshake.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::prev_frame::AddPicResult;
use crate::resource::Output;
use crate::types::{AudioStreamResult, Category, Tick, PREROLL_NONE};

use super::process_unit::{process_unit, reset_preroll_after_flush};
use super::Shared;

pub(super) fn spawn(shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    loop {
        let mut state = shared.state.lock().unwrap();

        // aborting ∧ ¬flushing is the only exit condition.
        if state.aborting && !state.flushing {
            break;
        }

        // Step 1: flush check.
        if state.flushing {
            drop(state);
            if let Some(packetizer) = shared.packetizer.lock().unwrap().as_mut() {
                packetizer.packetize(None);
            }
            {
                let mut codec = shared.codec.lock().unwrap();
                let mut outputs = crate::codec::CodecOutputs::default();
                codec.decode(None, &mut outputs);
            }
            reset_preroll_after_flush(shared);

            let mut state = shared.state.lock().unwrap();
            state.flushing = false;
            state.out_started = false;
            state.preroll_end = PREROLL_NONE;
            continue;
        }

        // Step 2: pause mirror.
        if state.paused != state.output_paused {
            let paused = state.paused;
            let date = state.paused_date;
            let countdown = state.countdown;
            drop(state);
            sync_pause_mirror(shared, paused, date, countdown);
            continue;
        }

        // Step 3: rate mirror.
        if state.rate != state.output_rate {
            let rate = state.rate;
            drop(state);
            sync_rate_mirror(shared, rate);
            shared.state.lock().unwrap().output_rate = rate;
            continue;
        }

        // Step 4: delay mirror.
        if state.delay != state.output_delay {
            let delay = state.delay;
            drop(state);
            sync_delay_mirror(shared, delay);
            shared.state.lock().unwrap().output_delay = delay;
            continue;
        }

        // Step 5: paused, nothing to step.
        if state.paused && state.countdown == 0 {
            state.idle = true;
            shared.cond_acknowledge.notify_all();
            state = shared.cond_request.wait(state).unwrap();
            state.idle = false;
            continue;
        }

        // Step 6: signal FIFO-has-room.
        shared.cond_fifo.notify_all();

        // Step 7: dequeue.
        let popped = state.fifo.pop();
        let unit = match popped {
            Some(unit) => unit,
            None => {
                if !state.draining {
                    state.idle = true;
                    if state.countdown > 0 {
                        drop(state);
                        shared.events.frame_next_need_data(true);
                        state = shared.state.lock().unwrap();
                    }
                    state = shared.cond_request.wait(state).unwrap();
                    state.idle = false;
                }
                continue;
            }
        };

        drop(state);

        // Step 8: process the unit.
        let was_draining_null = unit.is_none();
        process_unit(shared, unit);

        if was_draining_null {
            let mut state = shared.state.lock().unwrap();
            if state.draining {
                state.draining = false;
                drop(state);
                drain_category(shared);
            }
        }

        // Step 9: signal acknowledge.
        shared.cond_acknowledge.notify_all();
    }
}

/// Synchronizes the sink's pause state with the scheduling flag and, if
/// the decoder is now paused mid-step, services the pending countdown by
/// pulling ready pictures straight from the sink's next-queue.
///
/// Never holds `video` and `state` at the same time: `frame_next` (the
/// controller-thread counterpart touching the same two mutexes) follows the
/// same rule, which is what keeps the pair deadlock-free.
fn sync_pause_mirror(shared: &Shared, paused: bool, date: i64, countdown: i64) {
    match shared.category {
        Category::Video => {
            let mut video = shared.video.lock().unwrap();
            if let Some(sink) = video.sink.as_mut() {
                sink.change_pause(paused, date);
            }
            drop(video);
        }
        Category::Audio => {
            let mut audio = shared.audio.lock().unwrap();
            if let Some(stream) = audio.stream.as_mut() {
                stream.change_pause(paused, date);
            }
        }
        _ => {}
    }

    shared.events.on_output_paused(paused, date);

    let mut serviced = 0i64;
    if paused && shared.category == Category::Video && countdown != 0 {
        let mut video = shared.video.lock().unwrap();
        if let Some(sink) = video.sink.as_mut() {
            while serviced < countdown {
                match sink.next_queued() {
                    Some(picture) => {
                        sink.queue(picture);
                        serviced += 1;
                    }
                    None => break,
                }
            }
        }
        drop(video);
    }

    let mut state = shared.state.lock().unwrap();
    state.output_paused = paused;
    state.countdown -= serviced;
    drop(state);

    for _ in 0..serviced {
        shared.events.frame_next_status(0);
    }
}

fn sync_rate_mirror(shared: &Shared, rate: f32) {
    match shared.category {
        Category::Video => {
            let mut video = shared.video.lock().unwrap();
            if let Some(sink) = video.sink.as_mut() {
                sink.change_rate(rate);
            }
        }
        Category::Audio => {
            let mut audio = shared.audio.lock().unwrap();
            if let Some(stream) = audio.stream.as_mut() {
                stream.change_rate(rate);
            }
        }
        _ => {}
    }
}

fn sync_delay_mirror(shared: &Shared, delay: Tick) {
    match shared.category {
        Category::Video => {
            let mut video = shared.video.lock().unwrap();
            if let Some(sink) = video.sink.as_mut() {
                sink.change_delay(delay);
            }
        }
        Category::Audio => {
            let mut audio = shared.audio.lock().unwrap();
            if let Some(stream) = audio.stream.as_mut() {
                stream.change_delay(delay);
            }
        }
        Category::Subtitle => {
            let mut subtitle = shared.subtitle.lock().unwrap();
            if let Some(channel) = subtitle.channel.as_mut() {
                channel.change_delay(delay);
            }
        }
        _ => {}
    }
}

fn drain_category(shared: &Shared) {
    match shared.category {
        Category::Audio => {
            let mut audio = shared.audio.lock().unwrap();
            if let Some(stream) = audio.stream.as_mut() {
                stream.drain();
            }
        }
        Category::Video => {
            let mut state = shared.state.lock().unwrap();
            state.video_drained = true;
            let countdown_pending = state.countdown > 0;
            drop(state);
            if countdown_pending {
                let video = shared.video.lock().unwrap();
                let sink_empty = video.sink.as_ref().map(|s| s.is_empty()).unwrap_or(true);
                drop(video);
                if sink_empty {
                    shared
                        .events
                        .frame_next_status(crate::error::DecoderError::Again.as_errno());
                }
            }
        }
        _ => {}
    }
}

/// "wait-unblock" — serialises the waiting-for-first-frame
/// handshake. Returns `true` if the caller should proceed to hand the
/// output to the sink, `false` if the output must be dropped because a
/// flush raced it out (caller must release the output).
fn wait_unblock(shared: &Shared, first_ts: Tick) -> bool {
    let mut state = shared.state.lock().unwrap();

    if state.waiting {
        log::trace!("decoder {}: waiting for first frame", shared.id);
        state.has_data = true;
        shared.cond_acknowledge.notify_all();

        while state.waiting && state.has_data && !state.flushing {
            state = shared.cond_request.wait(state).unwrap();
        }

        if state.flushing {
            state.has_data = false;
            shared.cond_acknowledge.notify_all();
            return false;
        }
    }

    if !state.out_started {
        state.out_started = true;
        drop(state);
        let now = now_ticks();
        shared.clock.start(now, first_ts);
    }

    true
}

fn now_ticks() -> Tick {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as Tick)
        .unwrap_or(0)
}

/// Discards the unit if preroll hasn't been crossed yet; otherwise clears
/// preroll and reports that a flush-to-boundary is owed. Shared between
/// `play_video`/`play_audio`.
fn preroll_gate(shared: &Shared, pts: Tick) -> PrerollOutcome {
    let mut state = shared.state.lock().unwrap();
    if state.preroll_end == PREROLL_NONE {
        return PrerollOutcome::Pass;
    }
    if pts < state.preroll_end {
        return PrerollOutcome::Drop;
    }
    state.preroll_end = PREROLL_NONE;
    PrerollOutcome::Crossed
}

enum PrerollOutcome {
    Pass,
    Drop,
    Crossed,
}

/// `play_video`.
pub(super) fn play_video(shared: &Shared, mut picture: Output) {
    let Some(pts) = picture.pts else {
        log::debug!("decoder {}: dropping undated picture", shared.id);
        return;
    };

    {
        let state = shared.state.lock().unwrap();
        if state.flushing || state.aborting {
            return;
        }
    }

    match preroll_gate(shared, pts) {
        PrerollOutcome::Drop => return,
        PrerollOutcome::Crossed => {
            log::info!("decoder {}: end of preroll", shared.id);
            let mut video = shared.video.lock().unwrap();
            if let Some(sink) = video.sink.as_mut() {
                sink.flush();
            }
        }
        PrerollOutcome::Pass => {}
    }

    let paused = shared.state.lock().unwrap().paused;
    let has_pending_prev_frame = shared.prev_frame.lock().unwrap().has_pending_requests();
    if paused && has_pending_prev_frame {
        route_through_prev_frame(shared, picture, pts);
        return;
    }

    if !wait_unblock(shared, pts) {
        return;
    }

    let serviced_by_countdown = {
        let mut state = shared.state.lock().unwrap();
        if state.output_paused && state.countdown > 0 {
            state.countdown -= 1;
            true
        } else {
            false
        }
    };

    if serviced_by_countdown {
        let mut video = shared.video.lock().unwrap();
        if let Some(sink) = video.sink.as_mut() {
            sink.queue(picture);
        }
        drop(video);
        shared.events.frame_next_status(0);
        shared.state.lock().unwrap().last_displayed_pts = Some(pts);
        return;
    }

    let (waiting, first) = {
        let state = shared.state.lock().unwrap();
        (state.waiting, state.first)
    };
    if waiting && first {
        picture.force_display = true;
    }

    let mut video = shared.video.lock().unwrap();
    if let Some(sink) = video.sink.as_mut() {
        if picture.still {
            sink.flush_up_to(pts);
        }
        sink.queue(picture);
        let stats = sink.stats();
        drop(video);
        shared
            .events
            .on_new_video_stats(stats.decoded, stats.lost, stats.displayed, stats.late);
    }

    let mut state = shared.state.lock().unwrap();
    state.first = false;
    state.last_displayed_pts = Some(pts);
}

fn route_through_prev_frame(shared: &Shared, picture: Output, pts: Tick) {
    let mut last_pts = shared
        .state
        .lock()
        .unwrap()
        .last_displayed_pts
        .unwrap_or(pts);
    let result = {
        let mut prev_frame = shared.prev_frame.lock().unwrap();
        prev_frame.add_pic(Some(picture), &mut last_pts)
    };
    shared.state.lock().unwrap().last_displayed_pts = Some(last_pts);

    match result {
        AddPicResult::None => {}
        AddPicResult::Seek(req) => {
            shared
                .events
                .frame_previous_seek(last_pts, 0, 0, req.steps, req.failed);
            if req.failed {
                shared
                    .events
                    .frame_previous_status(crate::error::DecoderError::OutOfRange.as_errno());
            }
        }
        AddPicResult::Display { picture, seek, .. } => {
            {
                let mut video = shared.video.lock().unwrap();
                if let Some(sink) = video.sink.as_mut() {
                    sink.queue(picture);
                }
            }
            shared.events.frame_previous_status(0);
            if let Some(req) = seek {
                shared
                    .events
                    .frame_previous_seek(last_pts, 0, 0, req.steps, req.failed);
            }
        }
    }
}

/// `play_audio`.
pub(super) fn play_audio(shared: &Shared, block: Output) {
    let Some(pts) = block.pts else {
        log::debug!("decoder {}: dropping undated audio block", shared.id);
        return;
    };

    match preroll_gate(shared, pts) {
        PrerollOutcome::Drop => return,
        PrerollOutcome::Crossed => {
            let mut audio = shared.audio.lock().unwrap();
            if let Some(stream) = audio.stream.as_mut() {
                stream.flush();
            }
        }
        PrerollOutcome::Pass => {}
    }

    if !wait_unblock(shared, pts) {
        return;
    }

    let result = {
        let mut audio = shared.audio.lock().unwrap();
        audio
            .stream
            .as_mut()
            .map(|stream| stream.queue(block))
            .unwrap_or(AudioStreamResult::Ok)
    };

    match result {
        AudioStreamResult::Ok => {}
        AudioStreamResult::Changed => {
            shared.request_reload(crate::types::ReloadRequest::ReloadDecoder);
        }
        AudioStreamResult::Failed => {
            shared.request_reload(crate::types::ReloadRequest::ReloadDecoderAndAudioOutput);
        }
    }
}

/// `play_spu`.
pub(super) fn play_spu(shared: &Shared, subpicture: Output) {
    let Some(start) = subpicture.pts else {
        log::debug!("decoder {}: dropping undated subpicture", shared.id);
        return;
    };

    if matches!(preroll_gate(shared, start), PrerollOutcome::Drop) {
        // A full implementation also requires stop < preroll_end to
        // drop; this seam only carries a start timestamp for
        // subpictures, so a crossed-preroll start is sufficient to drop
        // here.
        return;
    }

    if !wait_unblock(shared, start) {
        return;
    }

    let mut subtitle = shared.subtitle.lock().unwrap();
    if let Some(channel) = subtitle.channel.as_mut() {
        let order = subtitle.next_order;
        channel.queue(subpicture, order);
    }
}

/// Synchronous-mode helper: drain whatever is currently queued on the
/// caller's own thread (no worker thread exists in this mode).
pub(super) fn drain_synchronous_queue(shared: &Shared) {
    loop {
        let unit = {
            let mut state = shared.state.lock().unwrap();
            match state.fifo.pop() {
                Some(unit) => unit,
                None => break,
            }
        };
        process_unit(shared, unit);
    }
}

pub(super) fn run_flush_synchronous(shared: &Shared) {
    if let Some(packetizer) = shared.packetizer.lock().unwrap().as_mut() {
        packetizer.packetize(None);
    }
    {
        let mut codec = shared.codec.lock().unwrap();
        let mut outputs = crate::codec::CodecOutputs::default();
        codec.decode(None, &mut outputs);
    }
    reset_preroll_after_flush(shared);
    let mut state = shared.state.lock().unwrap();
    state.flushing = false;
    state.out_started = false;
}

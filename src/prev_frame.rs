//! Previous-frame helper.
//!
//! A tiny state machine tracking the last displayed picture and asking the
//! upstream to seek backward by a growing number of steps when the user
//! steps back further than what is retained locally.

use crate::resource::Output;
use crate::types::Tick;

/// `seek_steps` grows additively on overshoot, per the explicit
/// instruction not to silently assume geometric growth: expose the
/// growth policy as a parameter. `INITIAL_SEEK_STEPS` anchors the
/// additive term.
const INITIAL_SEEK_STEPS: u32 = 1;
const MAX_SEEK_STEPS: u32 = 200;

/// Emitted when the helper wants the upstream to seek backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub steps: u32,
    pub failed: bool,
}

/// Outcome of feeding one picture into the helper.
#[derive(Debug)]
pub enum AddPicResult {
    /// Nothing to display yet; picture retained or dropped internally.
    None,
    /// Nothing to display yet, but a new backward seek must be issued.
    Seek(SeekRequest),
    /// The candidate previous-frame should be displayed now. If a new
    /// seek is also needed (more requests still pending), it is returned
    /// alongside.
    Display {
        picture: Output,
        resume: Output,
        seek: Option<SeekRequest>,
    },
}

#[derive(Debug, Default)]
pub struct PrevFrameHelper {
    pic: Option<Output>,
    req_count: u32,
    seek_steps: u32,
    flushing: bool,
    failed: bool,
}

impl PrevFrameHelper {
    pub fn new() -> Self {
        Self {
            pic: None,
            req_count: 0,
            seek_steps: INITIAL_SEEK_STEPS,
            flushing: false,
            failed: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Registers one more pending previous-frame request. Returns the
    /// seek to issue when this is the first pending request ("on first
    /// request after normal playback ... triggers the prev-frame helper
    /// to request upstream seek back by N frames", §4.1); later calls
    /// while a request is already outstanding just grow `req_count` and
    /// ride the existing walk (§4.4: "subsequent calls increment the
    /// pending request count").
    pub fn request(&mut self) -> Option<SeekRequest> {
        self.req_count += 1;
        if self.req_count == 1 {
            Some(self.emit_seek())
        } else {
            None
        }
    }

    pub fn has_pending_requests(&self) -> bool {
        self.req_count > 0
    }

    /// `add_pic(pic, inout last_pts)`.
    pub fn add_pic(&mut self, pic: Option<Output>, last_pts: &mut Tick) -> AddPicResult {
        if self.flushing {
            return AddPicResult::None;
        }

        let pic_date = pic.as_ref().and_then(|p| p.pts);

        if let (Some(candidate), Some(date)) = (&self.pic, pic_date) {
            let candidate_date = candidate.pts.unwrap_or(Tick::MIN);
            if date >= *last_pts && candidate_date <= *last_pts {
                // The retained candidate is now confirmed as the previous
                // frame: `pic` became the "resume" picture for when
                // playback continues forward.
                let candidate = self.pic.take().unwrap();
                *last_pts = candidate.pts.unwrap_or(*last_pts);
                self.req_count = self.req_count.saturating_sub(1);

                let seek = if self.req_count > 0 {
                    self.flushing = true;
                    Some(self.emit_seek())
                } else {
                    None
                };

                return AddPicResult::Display {
                    picture: candidate,
                    resume: pic.unwrap(),
                    seek,
                };
            }
        }

        let overshoot = match pic_date {
            None => true,
            Some(date) => date < *last_pts,
        };

        if overshoot {
            if self.pic.is_none() && !self.failed && self.req_count > 0 {
                self.seek_steps += 2 * INITIAL_SEEK_STEPS;
                self.failed = true;
                self.flushing = true;
                if self.seek_steps > MAX_SEEK_STEPS {
                    return AddPicResult::None;
                }
                return AddPicResult::Seek(self.emit_seek());
            }
            self.pic = None;
            return AddPicResult::None;
        }

        self.pic = pic;
        AddPicResult::None
    }

    /// Call once the upstream seek has actually happened and re-feed has
    /// resumed (clears `flushing`, keeps `seek_steps`/`failed` so repeated
    /// overshoots keep growing the step count).
    pub fn acknowledge_seek(&mut self) {
        self.flushing = false;
    }

    fn emit_seek(&self) -> SeekRequest {
        SeekRequest {
            steps: self.seek_steps,
            failed: self.seek_steps > MAX_SEEK_STEPS,
        }
    }

    pub fn is_out_of_range(&self) -> bool {
        self.seek_steps > MAX_SEEK_STEPS
    }
}

//! Closed-caption sub-decoder multiplex.
//!
//! A parent video/packetizer decoder produces a side-channel CC block plus
//! a descriptor of which 608 (up to 4) or 708 (up to 64) channels are
//! active. Sub-decoders are Subtitle-category decoders whose input format
//! is `CEA608`/`CEA708`; this module owns the bookkeeping (descriptor
//! diffing, channel routing, list membership) independent of how a
//! concrete sub-decoder is actually driven.

use crate::codec::CcDescriptor;
use serde::Serialize;
use std::sync::Mutex;

/// Elementary-stream format handed out by `GetCcDesc`, one per active bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CcStreamFormat {
    pub id: u32,
    pub channel: u8,
    pub reorder_depth: u8,
}

/// A registered child decoder: its routing channel and the sink it feeds.
pub trait CcChannelSink: Send {
    fn deliver(&mut self, block: &[u8]);
}

struct SubDecoderEntry {
    channel: u8,
    sink: Box<dyn CcChannelSink>,
}

/// Protected collection of child (CC) decoders, always acquired under or
/// after the parent's FIFO lock, never before.
#[derive(Default)]
pub struct SubDecoderList {
    entries: Mutex<Vec<SubDecoderEntry>>,
}

impl SubDecoderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// `CreateSubDec`.
    pub fn create(&self, channel: u8, sink: Box<dyn CcChannelSink>) {
        self.entries.lock().unwrap().push(SubDecoderEntry { channel, sink });
    }

    /// Removal from the list must happen before the sub-decoder's own
    /// worker is joined, so callers should call this before tearing down
    /// the sub-decoder's thread.
    pub fn remove(&self, channel: u8) {
        self.entries.lock().unwrap().retain(|e| e.channel != channel);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// `PlayCc`: routes the CC block to each child whose
    /// channel is active; all but the last subscribed child receive a
    /// duplicate, the last receives the original (modeled here simply as
    /// "every active child gets a copy" since the distinction is only
    /// meaningful for move-vs-clone in the legacy allocator).
    pub fn play_cc(&self, cc_block: &[u8], desc: &CcDescriptor) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            if desc.channel_bitmap & (1u64 << entry.channel) != 0 {
                entry.sink.deliver(cc_block);
            }
        }
    }
}

/// Tracks the last-queried descriptor so `GetCcDesc` only re-emits the
/// stream format array when it has actually changed.
#[derive(Debug, Default)]
pub struct CcDescriptorCache {
    last: Option<CcDescriptor>,
}

impl CcDescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `GetCcDesc`. Returns `None` when unchanged since the last call.
    pub fn get_cc_desc(&mut self, current: CcDescriptor) -> Option<Vec<CcStreamFormat>> {
        if self.last == Some(current) {
            return None;
        }
        self.last = Some(current);

        let mut out = Vec::new();
        for bit in 0..64u8 {
            if current.channel_bitmap & (1u64 << bit) != 0 {
                out.push(CcStreamFormat {
                    id: bit as u32 + 1,
                    channel: bit,
                    reorder_depth: current.reorder_depth,
                });
            }
        }
        Some(out)
    }
}

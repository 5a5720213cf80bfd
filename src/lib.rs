//! Input decoder subsystem: the component that sits between a
//! demultiplexer and the media sinks (audio output, video output,
//! subtitle renderer, or a stream-output muxer).
//!
//! This crate owns one codec instance per elementary stream, drives it on
//! a dedicated worker, negotiates the output format with the sink on the
//! fly, paces producer and consumer, and honors the playback-control
//! operations of a media input decoder (pause, rate change, flush, drain,
//! seek, step-by-frame, step-to-previous-frame, closed-caption
//! extraction, reload-on-format-change).
//!
//! The demultiplexer, codec modules, sink devices, clock, and resource
//! pool are external collaborators represented here as traits
//! ([`clock::Clock`], [`codec::Codec`], [`codec::Packetizer`],
//! [`resource::ResourceManager`], [`events::DecoderEvents`]).

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod fifo;
pub mod negotiate;
pub mod pipeline;
pub mod prev_frame;
pub mod resource;
pub mod sout;
pub mod subdecoder;
pub mod types;

pub use config::Config;
pub use error::DecoderError;
pub use pipeline::{CreateArgs, InputDecoder};
pub use types::{Category, InputType};

//! dubline - segment-level dubbing workflow
//!
//! Takes timestamped Chinese speech segments, translates them into English,
//! French or German, synthesizes speech per segment, and re-aligns the new
//! audio and subtitles against the original timeline with bounded drift.

pub mod align;
pub mod assemble;
pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod retry;
pub mod segment;
pub mod subtitle;
pub mod synthesis;
pub mod transcript;
pub mod translate;
pub mod workers;

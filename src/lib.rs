//! Segclip - Time-Segment Clip Pipeline
//!
//! Downloads a time range of a web video with yt-dlp, stream-copies it into a
//! single file with ffmpeg and removes every intermediate file on the way out.

pub mod cli;
pub mod config;
pub mod workflow;
pub mod media;
pub mod process;
pub mod cleanup;
pub mod job;
pub mod error;

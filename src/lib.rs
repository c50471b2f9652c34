//! Worksound - continuous work-sound playback from a remote music generator
//!
//! This library crate exposes the core functionality for integration testing.

pub mod client;
pub mod config;
pub mod generator;
pub mod player;
pub mod queue;

//! Per-channel audio playback for voice-chat bots.
//!
//! Requests are resolved against several media backends with caching and
//! fallback, queued per voice channel and rendered through a pluggable voice
//! provider. See [`player::Player`] for the command surface.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod backend;
pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod player;
mod preload;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod supervisor;
pub mod track;
pub mod voice;

//! Live audio broadcast engine.
//!
//! Data flow:
//! ```text
//!                        overlay: detach ──► Mixer (sox -m) ──┐
//!                                                             ▼
//! track file ──► Pacer (bytes/sec) ──► BroadcastSink ──► ListenerRegistry ──► listener 1..N
//! ```
//!
//! The [`bus::Bus`] owns the single playback session; every start, stop and
//! overlay request is serialized through its command loop.

pub mod audio_mixer;
pub mod bus;
pub mod catalog;
pub mod command;
pub mod error;
pub mod metadata;
pub mod pacer;
pub mod session;
pub mod sink;
pub mod stream;
pub mod tool;

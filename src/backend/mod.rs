//! Playback backends
//!
//! Each backend pairs a [`Sound`](crate::Sound) implementation with a
//! [`SoundBackend`](crate::SoundBackend) factory. Both build on
//! [`SoundCore`](crate::SoundCore) for the per-sound state machine and differ
//! in how playback time is produced.

#[cfg(feature = "mixer")]
pub mod mixer;
#[cfg(feature = "timeline")]
pub mod timeline;

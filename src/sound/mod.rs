//! Sound capability
//!
//! A [`Sound`] is one playable voice created from an asset key. Backends
//! implement the trait; the [`SoundManager`](crate::SoundManager) only talks
//! to sounds through it. Most backends build on [`SoundCore`], which carries
//! the shared per-sound state machine (markers, play/pause/resume/stop,
//! effective rate).

mod state;

pub use self::state::{SoundCore, VoiceFlags};

use crate::cache::Spritemap;
use crate::config::{GlobalSettings, SoundConfig};
use crate::events::SoundEvents;
use crate::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Shared handle to a registered sound. Registry identity is pointer
/// identity (`Arc::ptr_eq`).
pub type SoundHandle<S> = Arc<Mutex<S>>;

/// Upper bound on delivery rounds for one sound; listeners that keep
/// producing events beyond this are deferred to the next delivery.
const MAX_DELIVERY_ROUNDS: usize = 8;

/// Named, time-bounded region of a sound (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundMarker {
    /// Marker name, unique per sound
    pub name: String,
    /// Region start
    #[serde(default)]
    pub start: f64,
    /// Region length; defaults to the rest of the sound
    #[serde(default)]
    pub duration: Option<f64>,
    /// Playback settings used when the marker is played
    #[serde(default)]
    pub config: Option<SoundConfig>,
}

impl SoundMarker {
    /// Marker covering `duration` seconds from `start`
    pub fn new(name: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            name: name.into(),
            start,
            duration: Some(duration),
            config: None,
        }
    }

    /// Attach playback settings
    pub fn with_config(mut self, config: SoundConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// One playable voice.
///
/// Times passed to [`update`](Sound::update) are milliseconds; marker and
/// seek positions are seconds. Sounds never reach into the manager: the
/// global settings they depend on arrive as a snapshot through
/// [`calculate_rate`](Sound::calculate_rate).
pub trait Sound: Send + 'static {
    /// Asset key the sound was created from
    fn key(&self) -> &str;

    /// Set once the sound is destroyed; the manager reaps it on its next update
    fn is_pending_remove(&self) -> bool;

    /// True while playing
    fn is_playing(&self) -> bool;

    /// True while paused
    fn is_paused(&self) -> bool;

    /// Start playback, optionally at a registered marker and with explicit
    /// settings. Returns `Ok(false)` if the sound refused to start (e.g. it
    /// was destroyed) and an error for an unknown marker.
    fn play(&mut self, marker: Option<&str>, config: Option<&SoundConfig>) -> Result<bool>;

    /// Pause playback. Returns whether the state changed.
    fn pause(&mut self) -> bool;

    /// Resume paused playback. Returns whether the state changed.
    fn resume(&mut self) -> bool;

    /// Stop playback. Returns whether the state changed.
    fn stop(&mut self) -> bool;

    /// Release backend resources and mark the sound for removal. Idempotent.
    fn destroy(&mut self);

    /// Per-frame tick
    fn update(&mut self, time: f64, delta: f64);

    /// Recompute the effective playback rate from the global settings and
    /// the sound's own rate/detune
    fn calculate_rate(&mut self, globals: &GlobalSettings);

    /// Register a marker. Returns `false` for an empty or duplicate name.
    fn add_marker(&mut self, marker: SoundMarker) -> bool;

    /// Sprite metadata attached to an audio sprite sound
    fn spritemap(&self) -> Option<&Spritemap>;

    /// Attach sprite metadata
    fn set_spritemap(&mut self, spritemap: Spritemap);

    /// Event mailbox of the sound
    fn events_mut(&mut self) -> &mut SoundEvents;
}

/// Deliver every queued event of `sound` to its listeners.
///
/// Listeners receive the sound itself, so they may change its state (a
/// completion listener may destroy it); events queued by listeners are
/// delivered in follow-up rounds. Returns the number of listener calls.
pub fn deliver_events<S: Sound>(sound: &mut S) -> usize {
    let mut delivered = 0;
    let mut rounds = 0;
    loop {
        let (queued, mut listeners) = sound.events_mut().detach();
        if queued.is_empty() {
            sound.events_mut().reattach(listeners);
            break;
        }
        for event in &queued {
            delivered += listeners.emit_with(event, sound);
        }
        sound.events_mut().reattach(listeners);

        rounds += 1;
        if rounds == MAX_DELIVERY_ROUNDS {
            if !sound.events_mut().pending().is_empty() {
                warn!(
                    key = sound.key(),
                    "sound listeners keep queueing events; deferring the rest"
                );
            }
            break;
        }
    }
    sound.events_mut().release_if_closed();
    delivered
}

//! Multi-voice sound manager for game loops
//!
//! Coordinates many concurrently playing sounds inside an application's
//! frame loop. The [`SoundManager`] owns the registry of live sounds, pushes
//! global settings (mute, volume, rate, detune) to every sound, reaps and
//! ticks sounds once per frame, and pauses/resumes playback when the
//! application loses or regains focus.
//!
//! Playback itself is delegated to a [`SoundBackend`], injected at
//! construction. Two backends ship with the crate:
//! - [`backend::mixer`]: a software audio graph with a master bus that renders
//!   interleaved samples (optionally streamed to the sound card)
//! - [`backend::timeline`]: a clock-driven fallback that tracks playback
//!   position without producing samples
//!
//! # Crate feature flags
//! - `mixer` (default): Audio-graph backend (`backend::mixer`)
//! - `timeline` (default): Clock-driven fallback backend (`backend::timeline`)
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//! - `export-wav` (opt-in): Offline WAV rendering (enables optional `hound` dep)
//!
//! # Quick start
//! ```no_run
//! # #[cfg(feature = "timeline")]
//! # {
//! use std::sync::Arc;
//! use polyvoice::backend::timeline::TimelineBackend;
//! use polyvoice::{AudioCache, AudioClip, GameContext, ManagerConfig, SoundManager};
//!
//! let cache = Arc::new(AudioCache::new());
//! cache.insert_clip("laser", AudioClip::tone(880.0, 0.25, 44_100));
//!
//! let mut game = GameContext::new(cache);
//! let mut sounds = SoundManager::new(&mut game, TimelineBackend::new(), ManagerConfig::default());
//!
//! sounds.play("laser", None).unwrap();
//! sounds.update(16.0, 16.0);
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend; // Playback Backends
pub mod cache; // Asset Cache Boundary
pub mod config; // Settings & Configuration
pub mod events; // Event Channels
#[cfg(feature = "export-wav")]
pub mod export; // Offline Rendering
pub mod manager; // Sound Manager
pub mod signals; // Application Focus Signals
pub mod sound; // Sound Capability
#[cfg(feature = "streaming")]
pub mod streaming; // Audio Output

/// Error types for sound manager operations
#[derive(thiserror::Error, Debug)]
pub enum PolyvoiceError {
    /// No audio data is cached under the requested key
    #[error("Audio asset not found: {0}")]
    AssetNotFound(String),

    /// The key has audio data but no sprite metadata
    #[error("Audio sprite metadata not found: {0}")]
    SpriteNotFound(String),

    /// Sprite metadata could not be interpreted
    #[error("Invalid audio sprite data for '{key}': {reason}")]
    InvalidSpriteData {
        /// Asset key of the sprite
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Playback was requested at a marker the sound never registered
    #[error("Marker '{marker}' not found on sound '{key}'")]
    MarkerNotFound {
        /// Asset key of the sound
        key: String,
        /// Requested marker name
        marker: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Error writing rendered audio
    #[error("Export error: {0}")]
    Export(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PolyvoiceError {
    /// Creates an asset-not-found error
    pub fn asset_not_found(key: impl Into<String>) -> Self {
        PolyvoiceError::AssetNotFound(key.into())
    }

    /// Creates an invalid sprite data error
    pub fn invalid_sprite(key: impl Into<String>, reason: impl Into<String>) -> Self {
        PolyvoiceError::InvalidSpriteData {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates a marker-not-found error
    pub fn marker_not_found(key: impl Into<String>, marker: impl Into<String>) -> Self {
        PolyvoiceError::MarkerNotFound {
            key: key.into(),
            marker: marker.into(),
        }
    }
}

impl From<String> for PolyvoiceError {
    /// Converts a String into `PolyvoiceError::Other`.
    ///
    /// Prefer the specific variants (`AssetNotFound`, `MarkerNotFound`, ...)
    /// where the failure has a known cause; callers match on them.
    fn from(msg: String) -> Self {
        PolyvoiceError::Other(msg)
    }
}

impl From<&str> for PolyvoiceError {
    fn from(msg: &str) -> Self {
        PolyvoiceError::Other(msg.to_string())
    }
}

/// Result type for sound manager operations
pub type Result<T> = std::result::Result<T, PolyvoiceError>;

// Public API exports
pub use cache::{AssetCache, AudioCache, AudioClip, AudioSprite, SpriteEntry, Spritemap};
pub use config::{GlobalSettings, ManagerConfig, SoundConfig};
pub use events::{
    Event, EventChannel, ListenerId, ManagerEvent, ManagerEventKind, SoundEvent, SoundEventKind,
    SoundEvents,
};
pub use manager::{PlayExtra, SoundBackend, SoundManager};
pub use signals::{AppSignal, AppSignals, GameContext, SignalReceiver};
pub use sound::{deliver_events, Sound, SoundCore, SoundHandle, SoundMarker, VoiceFlags};

#[cfg(feature = "mixer")]
pub use backend::mixer::{MixerBackend, MixerConfig, MixerGraph, MixerSound, VoiceParams};
#[cfg(feature = "timeline")]
pub use backend::timeline::{TimelineBackend, TimelineSound};
#[cfg(feature = "export-wav")]
pub use export::render_to_wav;
#[cfg(feature = "streaming")]
pub use streaming::AudioDevice;

//! Settings and configuration
//!
//! Manager-wide defaults ([`ManagerConfig`]), per-sound playback settings
//! ([`SoundConfig`]) and the read-only snapshot of global parameters handed
//! to sounds when they recompute their playback rate ([`GlobalSettings`]).

use crate::{PolyvoiceError, Result};
use serde::{Deserialize, Serialize};

/// Ratio between two pitches one cent apart (2^(1/1200)).
pub const CENT: f64 = 1.000_577_789_506_554_8;

/// Detune bound in cents applied to the combined (global + per-sound) detune.
pub const MAX_DETUNE_CENTS: f64 = 1200.0;

/// Snapshot of the manager-wide playback parameters.
///
/// Sounds receive this by reference when the manager asks them to
/// recompute their effective rate; they never hold a live alias to the
/// manager's settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalSettings {
    /// Global mute
    pub mute: bool,
    /// Global volume multiplier (not clamped)
    pub volume: f32,
    /// Global playback speed multiplier
    pub rate: f64,
    /// Global detune in cents
    pub detune: f64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            mute: false,
            volume: 1.0,
            rate: 1.0,
            detune: 0.0,
        }
    }
}

impl From<&ManagerConfig> for GlobalSettings {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            mute: config.mute,
            volume: config.volume,
            rate: config.rate,
            detune: config.detune,
        }
    }
}

/// Initial settings of a [`SoundManager`](crate::SoundManager).
///
/// Every field is optional when deserializing:
///
/// ```
/// use polyvoice::ManagerConfig;
///
/// let cfg = ManagerConfig::from_json(r#"{ "volume": 0.5, "pause_on_blur": false }"#).unwrap();
/// assert_eq!(cfg.volume, 0.5);
/// assert_eq!(cfg.rate, 1.0);
/// assert!(!cfg.pause_on_blur);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Start muted
    pub mute: bool,
    /// Initial global volume
    pub volume: f32,
    /// Initial global rate
    pub rate: f64,
    /// Initial global detune in cents
    pub detune: f64,
    /// Pause every sound when the application loses focus
    pub pause_on_blur: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mute: false,
            volume: 1.0,
            rate: 1.0,
            detune: 0.0,
            pause_on_blur: true,
        }
    }
}

impl ManagerConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| PolyvoiceError::Config(e.to_string()))
    }

    /// Serialize the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Playback settings of a single sound or marker.
///
/// Times are in seconds. How a backend realises each option is up to the
/// backend, but every backend accepts all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Per-sound mute
    pub mute: bool,
    /// Per-sound volume multiplier
    pub volume: f32,
    /// Per-sound playback speed multiplier
    pub rate: f64,
    /// Per-sound detune in cents
    pub detune: f64,
    /// Start offset into the sound (or marker) in seconds
    pub seek: f64,
    /// Restart from the beginning when the end is reached
    #[serde(rename = "loop")]
    pub looping: bool,
    /// Delay before playback starts, in seconds
    pub delay: f64,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            mute: false,
            volume: 1.0,
            rate: 1.0,
            detune: 0.0,
            seek: 0.0,
            looping: false,
            delay: 0.0,
        }
    }
}

impl SoundConfig {
    /// Set the per-sound volume
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Set the per-sound mute flag
    pub fn with_mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    /// Set the per-sound rate
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Set the per-sound detune (cents)
    pub fn with_detune(mut self, detune: f64) -> Self {
        self.detune = detune;
        self
    }

    /// Set the start offset (seconds)
    pub fn with_seek(mut self, seek: f64) -> Self {
        self.seek = seek;
        self
    }

    /// Enable or disable looping
    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Set the start delay (seconds)
    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }
}

//! Asset cache boundary
//!
//! The manager resolves asset keys through an [`AssetCache`]: decoded audio
//! for plain sounds, and sprite metadata for audio sprites. [`AudioCache`]
//! is the in-memory implementation used by the bundled backends.
//!
//! Audio sprite metadata follows the common `audiosprite` JSON layout:
//!
//! ```json
//! {
//!   "resources": ["sfx.ogg", "sfx.mp3"],
//!   "spritemap": {
//!     "coin":  { "start": 0.0, "end": 0.4 },
//!     "music": { "start": 1.0, "end": 9.0, "loop": true }
//!   }
//! }
//! ```

use crate::{PolyvoiceError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::f32::consts::TAU;
use std::sync::Arc;
use tracing::warn;

/// Decoded, interleaved PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioClip {
    /// Wrap interleaved samples.
    ///
    /// Trailing samples that do not form a whole frame are dropped.
    pub fn new(mut samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(PolyvoiceError::Config("audio clip needs at least one channel".into()));
        }
        if sample_rate == 0 {
            return Err(PolyvoiceError::Config("audio clip sample rate must be non-zero".into()));
        }
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Mono silence of the given length
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self {
            samples: vec![0.0; frames],
            channels: 1,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Mono sine tone at half amplitude
    pub fn tone(frequency: f32, seconds: f64, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        let step = TAU * frequency / sample_rate as f32;
        let samples = (0..frames).map(|i| 0.5 * (step * i as f32).sin()).collect();
        Self {
            samples,
            channels: 1,
            sample_rate,
        }
    }

    /// Number of interleaved channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample of `channel` at `frame`; silence outside the clip.
    /// Channels beyond the clip's count wrap (mono feeds every output).
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let ch = channel % self.channels as usize;
        self.samples
            .get(frame * self.channels as usize + ch)
            .copied()
            .unwrap_or(0.0)
    }

    /// Raw interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// One named region of an audio sprite (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpriteEntry {
    /// Region start
    pub start: f64,
    /// Region end
    pub end: f64,
    /// Whether the region loops when played
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,
}

impl SpriteEntry {
    /// Region length in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Marker name → region, in name order.
pub type Spritemap = BTreeMap<String, SpriteEntry>;

/// Parsed audio sprite metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioSprite {
    /// Source files the sprite was encoded to
    pub resources: Vec<String>,
    /// Named regions
    pub spritemap: Spritemap,
}

impl AudioSprite {
    /// Parse sprite metadata from JSON text.
    pub fn from_json(key: &str, text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| PolyvoiceError::invalid_sprite(key, e.to_string()))?;
        Self::from_value(key, &value)
    }

    /// Build sprite metadata from an already parsed JSON document.
    ///
    /// The document must contain a `spritemap` object. Entries that are not
    /// `{start, end}` objects, or that end before they start, are skipped.
    pub fn from_value(key: &str, value: &serde_json::Value) -> Result<Self> {
        let map = value
            .get("spritemap")
            .and_then(|m| m.as_object())
            .ok_or_else(|| PolyvoiceError::invalid_sprite(key, "missing 'spritemap' object"))?;

        let resources = value
            .get("resources")
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        let mut spritemap = Spritemap::new();
        for (name, raw) in map {
            match SpriteEntry::deserialize(raw) {
                Ok(entry) if entry.end >= entry.start => {
                    spritemap.insert(name.clone(), entry);
                }
                Ok(entry) => {
                    warn!(
                        key,
                        marker = %name,
                        start = entry.start,
                        end = entry.end,
                        "skipping sprite entry that ends before it starts"
                    );
                }
                Err(e) => {
                    warn!(key, marker = %name, error = %e, "skipping malformed sprite entry");
                }
            }
        }

        Ok(Self {
            resources,
            spritemap,
        })
    }
}

/// Resolves asset keys to decoded audio and sprite metadata.
pub trait AssetCache: Send + Sync {
    /// Decoded audio for `key`
    fn clip(&self, key: &str) -> Option<Arc<AudioClip>>;

    /// Sprite metadata for `key`
    fn sprite(&self, key: &str) -> Option<AudioSprite>;
}

/// In-memory asset cache.
///
/// Interior mutability lets a loader keep adding assets while managers
/// already hold the cache.
#[derive(Debug, Default)]
pub struct AudioCache {
    clips: RwLock<HashMap<String, Arc<AudioClip>>>,
    sprites: RwLock<HashMap<String, AudioSprite>>,
}

impl AudioCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store decoded audio under `key`, replacing any previous clip
    pub fn insert_clip(&self, key: impl Into<String>, clip: AudioClip) {
        self.clips.write().insert(key.into(), Arc::new(clip));
    }

    /// Store sprite metadata under `key`
    pub fn insert_sprite(&self, key: impl Into<String>, sprite: AudioSprite) {
        self.sprites.write().insert(key.into(), sprite);
    }

    /// Parse and store sprite metadata under `key`
    pub fn insert_sprite_json(&self, key: impl Into<String>, text: &str) -> Result<()> {
        let key = key.into();
        let sprite = AudioSprite::from_json(&key, text)?;
        self.insert_sprite(key, sprite);
        Ok(())
    }

    /// Remove audio and sprite metadata for `key`. Returns whether anything
    /// was stored.
    pub fn remove(&self, key: &str) -> bool {
        let clip = self.clips.write().remove(key).is_some();
        let sprite = self.sprites.write().remove(key).is_some();
        clip || sprite
    }

    /// True if audio is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.clips.read().contains_key(key)
    }

    /// Keys with stored audio, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.clips.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl AssetCache for AudioCache {
    fn clip(&self, key: &str) -> Option<Arc<AudioClip>> {
        self.clips.read().get(key).cloned()
    }

    fn sprite(&self, key: &str) -> Option<AudioSprite> {
        self.sprites.read().get(key).cloned()
    }
}

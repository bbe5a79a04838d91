//! Shared per-sound state machine
//!
//! Transitions:
//! - `play`: any live state → playing (restarts when already playing)
//! - `pause`: playing → paused
//! - `resume`: paused → playing
//! - `stop`: playing | paused → stopped
//! - `complete`: playing → stopped (end reached without looping)
//! - `destroy`: any → pending removal (terminal)

use super::SoundMarker;
use crate::cache::Spritemap;
use crate::config::{GlobalSettings, SoundConfig, CENT, MAX_DETUNE_CENTS};
use crate::events::{SoundEvent, SoundEvents};
use crate::{PolyvoiceError, Result};
use bitflags::bitflags;
use std::collections::BTreeMap;
use tracing::warn;

bitflags! {
    /// Lifecycle flags of a sound
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VoiceFlags: u8 {
        /// Playback running
        const PLAYING = 0x01;
        /// Playback paused (position kept)
        const PAUSED = 0x02;
        /// Destroyed; waiting to be reaped by the manager
        const PENDING_REMOVE = 0x04;
    }
}

/// Backend-independent state of one sound.
#[derive(Debug)]
pub struct SoundCore {
    key: String,
    config: SoundConfig,
    current_config: SoundConfig,
    markers: BTreeMap<String, SoundMarker>,
    current_marker: Option<String>,
    spritemap: Option<Spritemap>,
    flags: VoiceFlags,
    total_duration: f64,
    duration: f64,
    total_rate: f64,
    globals: GlobalSettings,
    events: SoundEvents,
}

impl SoundCore {
    /// Create the state of a sound `total_duration` seconds long
    pub fn new(
        key: impl Into<String>,
        config: SoundConfig,
        total_duration: f64,
        globals: &GlobalSettings,
    ) -> Self {
        let mut core = Self {
            key: key.into(),
            current_config: config.clone(),
            config,
            markers: BTreeMap::new(),
            current_marker: None,
            spritemap: None,
            flags: VoiceFlags::empty(),
            total_duration,
            duration: total_duration,
            total_rate: 1.0,
            globals: *globals,
            events: SoundEvents::new(),
        };
        core.calculate_rate(globals);
        core
    }

    /// Asset key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Settings the sound was created with
    pub fn config(&self) -> &SoundConfig {
        &self.config
    }

    /// Settings of the current (or last) playback
    pub fn current_config(&self) -> &SoundConfig {
        &self.current_config
    }

    /// Lifecycle flags
    pub fn flags(&self) -> VoiceFlags {
        self.flags
    }

    /// True while playing
    pub fn is_playing(&self) -> bool {
        self.flags.contains(VoiceFlags::PLAYING)
    }

    /// True while paused
    pub fn is_paused(&self) -> bool {
        self.flags.contains(VoiceFlags::PAUSED)
    }

    /// True once destroyed
    pub fn is_pending_remove(&self) -> bool {
        self.flags.contains(VoiceFlags::PENDING_REMOVE)
    }

    /// Length of the whole sound in seconds
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Length of the segment being played (marker or whole sound)
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Start of the segment being played
    pub fn segment_start(&self) -> f64 {
        self.current_marker().map_or(0.0, |m| m.start)
    }

    /// Effective playback rate (per-sound × global × detune)
    pub fn total_rate(&self) -> f64 {
        self.total_rate
    }

    /// Last global settings received
    pub fn globals(&self) -> &GlobalSettings {
        &self.globals
    }

    /// Marker being played, if any
    pub fn current_marker(&self) -> Option<&SoundMarker> {
        self.current_marker
            .as_deref()
            .and_then(|name| self.markers.get(name))
    }

    /// Registered marker by name
    pub fn marker(&self, name: &str) -> Option<&SoundMarker> {
        self.markers.get(name)
    }

    /// All registered markers, by name
    pub fn markers(&self) -> impl Iterator<Item = &SoundMarker> {
        self.markers.values()
    }

    /// Sprite metadata
    pub fn spritemap(&self) -> Option<&Spritemap> {
        self.spritemap.as_ref()
    }

    /// Attach sprite metadata
    pub fn set_spritemap(&mut self, spritemap: Spritemap) {
        self.spritemap = Some(spritemap);
    }

    /// Event mailbox
    pub fn events(&self) -> &SoundEvents {
        &self.events
    }

    /// Event mailbox
    pub fn events_mut(&mut self) -> &mut SoundEvents {
        &mut self.events
    }

    /// Register a marker.
    ///
    /// A missing duration extends the marker to the end of the sound and
    /// missing settings default to [`SoundConfig::default`].
    pub fn add_marker(&mut self, marker: SoundMarker) -> bool {
        if marker.name.is_empty() {
            warn!(key = %self.key, "refusing marker without a name");
            return false;
        }
        if self.markers.contains_key(&marker.name) {
            warn!(key = %self.key, marker = %marker.name, "marker already exists");
            return false;
        }
        let marker = self.normalize(marker);
        self.markers.insert(marker.name.clone(), marker);
        true
    }

    /// Replace an existing marker. Returns `false` if no marker has that name.
    pub fn update_marker(&mut self, marker: SoundMarker) -> bool {
        if !self.markers.contains_key(&marker.name) {
            warn!(key = %self.key, marker = %marker.name, "cannot update unknown marker");
            return false;
        }
        let marker = self.normalize(marker);
        self.markers.insert(marker.name.clone(), marker);
        true
    }

    /// Remove a marker, returning it
    pub fn remove_marker(&mut self, name: &str) -> Option<SoundMarker> {
        let removed = self.markers.remove(name);
        if removed.is_some() && self.current_marker.as_deref() == Some(name) {
            self.current_marker = None;
        }
        removed
    }

    fn normalize(&self, mut marker: SoundMarker) -> SoundMarker {
        if marker.duration.is_none() {
            marker.duration = Some((self.total_duration - marker.start).max(0.0));
        }
        if marker.config.is_none() {
            marker.config = Some(SoundConfig::default());
        }
        marker
    }

    /// Enter the playing state.
    ///
    /// Without a marker the whole sound plays with the creation settings;
    /// with a marker its region and settings are used. An explicit `config`
    /// replaces either.
    pub fn play(&mut self, marker: Option<&str>, config: Option<&SoundConfig>) -> Result<bool> {
        if self.is_pending_remove() {
            return Ok(false);
        }

        let base = match marker.filter(|name| !name.is_empty()) {
            None => {
                self.current_marker = None;
                self.duration = self.total_duration;
                self.config.clone()
            }
            Some(name) => {
                let Some(found) = self.markers.get(name) else {
                    warn!(key = %self.key, marker = name, "play requested at unknown marker");
                    return Err(PolyvoiceError::marker_not_found(&self.key, name));
                };
                self.duration = found.duration.unwrap_or(self.total_duration - found.start);
                let base = found.config.clone().unwrap_or_default();
                self.current_marker = Some(name.to_owned());
                base
            }
        };

        self.current_config = config.cloned().unwrap_or(base);
        self.flags = VoiceFlags::PLAYING;
        let globals = self.globals;
        self.calculate_rate(&globals);
        self.events.push(SoundEvent::Play);
        Ok(true)
    }

    /// Enter the paused state
    pub fn pause(&mut self) -> bool {
        if !self.is_playing() || self.is_paused() {
            return false;
        }
        self.flags = VoiceFlags::PAUSED;
        self.events.push(SoundEvent::Pause);
        true
    }

    /// Leave the paused state
    pub fn resume(&mut self) -> bool {
        if !self.is_paused() || self.is_playing() {
            return false;
        }
        self.flags = VoiceFlags::PLAYING;
        self.events.push(SoundEvent::Resume);
        true
    }

    /// Enter the stopped state
    pub fn stop(&mut self) -> bool {
        if !self.is_playing() && !self.is_paused() {
            return false;
        }
        self.flags = VoiceFlags::empty();
        self.events.push(SoundEvent::Stop);
        true
    }

    /// Playback reached the segment end without looping
    pub fn complete(&mut self) {
        if !self.is_playing() {
            return;
        }
        self.flags = VoiceFlags::empty();
        self.events.push(SoundEvent::Complete);
    }

    /// A looping segment wrapped around
    pub fn looped(&mut self) {
        self.events.push(SoundEvent::Looped);
    }

    /// Pause without notifying listeners (focus loss). Returns whether the
    /// sound was playing.
    pub fn suspend(&mut self) -> bool {
        if !self.is_playing() {
            return false;
        }
        self.flags = VoiceFlags::PAUSED;
        true
    }

    /// Undo [`suspend`](Self::suspend). Returns whether the sound was paused.
    pub fn unsuspend(&mut self) -> bool {
        if !self.is_paused() {
            return false;
        }
        self.flags = VoiceFlags::PLAYING;
        true
    }

    /// Enter the terminal state. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.is_pending_remove() {
            return;
        }
        self.events.push(SoundEvent::Destroy);
        self.events.close();
        self.flags = VoiceFlags::PENDING_REMOVE;
        self.markers.clear();
        self.current_marker = None;
        self.spritemap = None;
    }

    /// Recompute the effective rate. The combined detune is clamped to
    /// ±1200 cents.
    pub fn calculate_rate(&mut self, globals: &GlobalSettings) -> f64 {
        self.globals = *globals;
        let detune = (self.current_config.detune + globals.detune)
            .clamp(-MAX_DETUNE_CENTS, MAX_DETUNE_CENTS);
        self.total_rate = self.current_config.rate * globals.rate * CENT.powf(detune);
        self.total_rate
    }

    /// Gain of the sound alone, ignoring the global mute and volume
    pub fn local_gain(&self) -> f32 {
        if self.current_config.mute {
            0.0
        } else {
            self.current_config.volume
        }
    }

    /// Gain including the global mute and volume
    pub fn effective_volume(&self) -> f32 {
        if self.globals.mute {
            0.0
        } else {
            self.local_gain() * self.globals.volume
        }
    }

    /// Remember new global settings without touching the rate
    pub fn set_globals(&mut self, globals: &GlobalSettings) {
        self.globals = *globals;
    }

    /// Per-sound mute
    pub fn set_mute(&mut self, mute: bool) {
        self.current_config.mute = mute;
        self.events.push(SoundEvent::Mute(mute));
    }

    /// Per-sound volume
    pub fn set_volume(&mut self, volume: f32) {
        self.current_config.volume = volume;
        self.events.push(SoundEvent::Volume(volume));
    }

    /// Per-sound rate
    pub fn set_rate(&mut self, rate: f64) {
        self.current_config.rate = rate;
        let globals = self.globals;
        self.calculate_rate(&globals);
        self.events.push(SoundEvent::Rate(rate));
    }

    /// Per-sound detune in cents
    pub fn set_detune(&mut self, detune: f64) {
        self.current_config.detune = detune;
        let globals = self.globals;
        self.calculate_rate(&globals);
        self.events.push(SoundEvent::Detune(detune));
    }

    /// Per-sound looping
    pub fn set_loop(&mut self, looping: bool) {
        self.current_config.looping = looping;
        self.events.push(SoundEvent::Loop(looping));
    }

    /// Record a seek and notify listeners
    pub fn set_seek(&mut self, seconds: f64) {
        self.current_config.seek = seconds;
        self.events.push(SoundEvent::Seek(seconds));
    }
}

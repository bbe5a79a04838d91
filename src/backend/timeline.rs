//! Clock-driven fallback backend
//!
//! Tracks where each sound would be without producing samples: the playhead
//! advances by the frame delta scaled by the sound's effective rate. Useful
//! headless (servers, tests) and wherever no output device exists.

use crate::cache::{AssetCache, Spritemap};
use crate::config::{GlobalSettings, SoundConfig};
use crate::events::SoundEvents;
use crate::manager::SoundBackend;
use crate::sound::{Sound, SoundCore, SoundHandle, SoundMarker};
use crate::{PolyvoiceError, Result};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Sound whose position follows the frame clock.
#[derive(Debug)]
pub struct TimelineSound {
    core: SoundCore,
    /// Position inside the current segment, seconds
    playhead: f64,
    /// Start delay still to wait, seconds
    delay_remaining: f64,
}

impl TimelineSound {
    /// Create a sound `duration` seconds long
    pub fn new(key: &str, config: SoundConfig, duration: f64, globals: &GlobalSettings) -> Self {
        Self {
            core: SoundCore::new(key, config, duration, globals),
            playhead: 0.0,
            delay_remaining: 0.0,
        }
    }

    /// Shared state
    pub fn core(&self) -> &SoundCore {
        &self.core
    }

    /// Position inside the current segment, seconds
    pub fn seek(&self) -> f64 {
        self.playhead
    }

    /// Move the playhead inside the current segment
    pub fn set_seek(&mut self, seconds: f64) {
        self.playhead = seconds.clamp(0.0, self.core.duration());
        self.core.set_seek(self.playhead);
    }

    /// Start delay still to wait, seconds
    pub fn delay_remaining(&self) -> f64 {
        self.delay_remaining
    }

    /// Per-sound volume
    pub fn set_volume(&mut self, volume: f32) {
        self.core.set_volume(volume);
    }

    /// Per-sound mute
    pub fn set_mute(&mut self, mute: bool) {
        self.core.set_mute(mute);
    }

    /// Per-sound rate
    pub fn set_rate(&mut self, rate: f64) {
        self.core.set_rate(rate);
    }

    /// Per-sound detune in cents
    pub fn set_detune(&mut self, detune: f64) {
        self.core.set_detune(detune);
    }

    /// Per-sound looping
    pub fn set_loop(&mut self, looping: bool) {
        self.core.set_loop(looping);
    }

    /// Gain the sound would be heard at
    pub fn gain(&self) -> f32 {
        self.core.effective_volume()
    }

    fn rewind(&mut self) {
        self.playhead = 0.0;
        self.delay_remaining = 0.0;
    }
}

impl Sound for TimelineSound {
    fn key(&self) -> &str {
        self.core.key()
    }

    fn is_pending_remove(&self) -> bool {
        self.core.is_pending_remove()
    }

    fn is_playing(&self) -> bool {
        self.core.is_playing()
    }

    fn is_paused(&self) -> bool {
        self.core.is_paused()
    }

    fn play(&mut self, marker: Option<&str>, config: Option<&SoundConfig>) -> Result<bool> {
        if !self.core.play(marker, config)? {
            return Ok(false);
        }
        let current = self.core.current_config();
        self.playhead = current.seek.clamp(0.0, self.core.duration());
        self.delay_remaining = current.delay.max(0.0);
        Ok(true)
    }

    fn pause(&mut self) -> bool {
        self.core.pause()
    }

    fn resume(&mut self) -> bool {
        self.core.resume()
    }

    fn stop(&mut self) -> bool {
        let stopped = self.core.stop();
        if stopped {
            self.rewind();
        }
        stopped
    }

    fn destroy(&mut self) {
        self.core.destroy();
        self.rewind();
    }

    fn update(&mut self, _time: f64, delta: f64) {
        if !self.core.is_playing() {
            return;
        }

        let mut elapsed = (delta / 1000.0).max(0.0);
        if self.delay_remaining > 0.0 {
            let waited = elapsed.min(self.delay_remaining);
            self.delay_remaining -= waited;
            elapsed -= waited;
        }

        self.playhead += elapsed * self.core.total_rate().max(0.0);

        let duration = self.core.duration();
        if self.playhead < duration {
            return;
        }
        if self.core.current_config().looping && duration > 0.0 {
            self.playhead %= duration;
            self.core.looped();
        } else {
            self.playhead = duration;
            self.core.complete();
        }
    }

    fn calculate_rate(&mut self, globals: &GlobalSettings) {
        self.core.calculate_rate(globals);
    }

    fn add_marker(&mut self, marker: SoundMarker) -> bool {
        self.core.add_marker(marker)
    }

    fn spritemap(&self) -> Option<&Spritemap> {
        self.core.spritemap()
    }

    fn set_spritemap(&mut self, spritemap: Spritemap) {
        self.core.set_spritemap(spritemap);
    }

    fn events_mut(&mut self) -> &mut SoundEvents {
        self.core.events_mut()
    }
}

/// Factory for [`TimelineSound`]s.
///
/// Focus loss suspends every playing sound without notifying its listeners;
/// focus gain resumes the ones still suspended.
#[derive(Debug, Default)]
pub struct TimelineBackend {
    suspended: Vec<Weak<Mutex<TimelineSound>>>,
}

impl TimelineBackend {
    /// Create a backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sounds suspended by focus loss
    pub fn suspended_count(&self) -> usize {
        self.suspended.iter().filter(|s| s.strong_count() > 0).count()
    }

    fn refresh_globals<F>(active: &[SoundHandle<TimelineSound>], apply: F)
    where
        F: Fn(&mut GlobalSettings),
    {
        for handle in active {
            let mut sound = handle.lock();
            let mut globals = *sound.core.globals();
            apply(&mut globals);
            sound.core.set_globals(&globals);
        }
    }
}

impl SoundBackend for TimelineBackend {
    type Sound = TimelineSound;

    fn create(
        &mut self,
        cache: &dyn AssetCache,
        key: &str,
        config: &SoundConfig,
        globals: &GlobalSettings,
    ) -> Result<TimelineSound> {
        let clip = cache
            .clip(key)
            .ok_or_else(|| PolyvoiceError::asset_not_found(key))?;
        Ok(TimelineSound::new(key, config.clone(), clip.duration(), globals))
    }

    fn on_blur(&mut self, active: &[SoundHandle<TimelineSound>]) {
        for handle in active {
            if handle.lock().core.suspend() {
                self.suspended.push(Arc::downgrade(handle));
            }
        }
        debug!(suspended = self.suspended.len(), "timeline suspended");
    }

    fn on_focus(&mut self, _active: &[SoundHandle<TimelineSound>]) {
        let mut resumed = 0;
        for weak in self.suspended.drain(..) {
            let Some(handle) = weak.upgrade() else {
                continue;
            };
            let mut sound = handle.lock();
            if !sound.is_pending_remove() && sound.core.unsuspend() {
                resumed += 1;
            }
        }
        debug!(resumed, "timeline resumed");
    }

    fn set_mute(&mut self, mute: bool, active: &[SoundHandle<TimelineSound>]) {
        Self::refresh_globals(active, |g| g.mute = mute);
    }

    fn set_volume(&mut self, volume: f32, active: &[SoundHandle<TimelineSound>]) {
        Self::refresh_globals(active, |g| g.volume = volume);
    }

    fn destroy(&mut self) {
        self.suspended.clear();
    }
}

//! Sound manager
//!
//! [`SoundManager`] owns the registry of sounds created through a
//! [`SoundBackend`], applies the global settings (mute, volume, rate,
//! detune) to every active sound, reacts to application focus changes and
//! performs the per-frame maintenance pass:
//!
//! 1. drain focus signals
//! 2. tick the backend
//! 3. deliver queued sound events (fire-and-forget sounds destroy themselves here)
//! 4. reap sounds marked for removal, tail to head
//! 5. tick the surviving sounds in registry order

use crate::cache::AssetCache;
use crate::config::{GlobalSettings, ManagerConfig, SoundConfig};
use crate::events::{EventChannel, ManagerEvent, SoundEventKind};
use crate::signals::{AppSignal, GameContext, SignalReceiver};
use crate::sound::{deliver_events, Sound, SoundHandle, SoundMarker};
use crate::{PolyvoiceError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Factory and global hooks of a playback backend.
///
/// The manager never creates sounds itself; it asks the backend it was
/// built with. Hooks that affect every sound receive the currently active
/// (not pending removal) sounds.
pub trait SoundBackend: Send {
    /// Sound type produced by this backend
    type Sound: Sound;

    /// Create a sound for `key` with the given initial settings
    fn create(
        &mut self,
        cache: &dyn AssetCache,
        key: &str,
        config: &SoundConfig,
        globals: &GlobalSettings,
    ) -> Result<Self::Sound>;

    /// The application lost focus while pause-on-blur is enabled
    fn on_blur(&mut self, active: &[SoundHandle<Self::Sound>]);

    /// The application regained focus while pause-on-blur is enabled
    fn on_focus(&mut self, active: &[SoundHandle<Self::Sound>]);

    /// Global mute changed
    fn set_mute(&mut self, _mute: bool, _active: &[SoundHandle<Self::Sound>]) {}

    /// Global volume changed
    fn set_volume(&mut self, _volume: f32, _active: &[SoundHandle<Self::Sound>]) {}

    /// Per-frame tick, before any sound is ticked
    fn update(&mut self, _time: f64, _delta: f64) {}

    /// The owning manager is being torn down
    fn destroy(&mut self) {}
}

/// Optional argument of [`SoundManager::play`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayExtra {
    /// Plain playback settings
    Config(SoundConfig),
    /// Register this marker, then play it
    Marker(SoundMarker),
}

impl From<SoundConfig> for PlayExtra {
    fn from(config: SoundConfig) -> Self {
        PlayExtra::Config(config)
    }
}

impl From<SoundMarker> for PlayExtra {
    fn from(marker: SoundMarker) -> Self {
        PlayExtra::Marker(marker)
    }
}

/// Coordinator of every sound created through one backend.
pub struct SoundManager<B: SoundBackend> {
    backend: B,
    cache: Arc<dyn AssetCache>,
    sounds: Vec<SoundHandle<B::Sound>>,
    events: EventChannel<ManagerEvent>,
    settings: GlobalSettings,
    pause_on_blur: bool,
    signals: SignalReceiver,
    destroyed: bool,
}

impl<B: SoundBackend> std::fmt::Debug for SoundManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundManager")
            .field("sounds", &self.sounds.len())
            .field("settings", &self.settings)
            .field("pause_on_blur", &self.pause_on_blur)
            .finish()
    }
}

impl<B: SoundBackend> SoundManager<B> {
    /// Bind a manager to `game`, subscribing to its focus signals.
    pub fn new(game: &mut GameContext, backend: B, config: ManagerConfig) -> Self {
        let signals = game.signals_mut().subscribe();
        let settings = GlobalSettings::from(&config);
        debug!(?settings, pause_on_blur = config.pause_on_blur, "sound manager created");
        Self {
            backend,
            cache: Arc::clone(game.cache()),
            sounds: Vec::new(),
            events: EventChannel::new(),
            settings,
            pause_on_blur: config.pause_on_blur,
            signals,
            destroyed: false,
        }
    }

    // ------------------------------------------------------------------
    // Creation and playback
    // ------------------------------------------------------------------

    /// Create and register a sound for `key`.
    pub fn add(&mut self, key: &str, config: Option<SoundConfig>) -> Result<SoundHandle<B::Sound>> {
        let config = config.unwrap_or_default();
        let sound = self
            .backend
            .create(self.cache.as_ref(), key, &config, &self.settings)?;
        let handle = Arc::new(Mutex::new(sound));
        self.sounds.push(Arc::clone(&handle));
        trace!(key, registered = self.sounds.len(), "sound added");
        Ok(handle)
    }

    /// Create and register an audio sprite sound for `key`.
    ///
    /// Every spritemap entry becomes a marker spanning `end - start`. The
    /// marker settings are `config` with the entry's own loop flag, if any.
    pub fn add_audio_sprite(
        &mut self,
        key: &str,
        config: Option<SoundConfig>,
    ) -> Result<SoundHandle<B::Sound>> {
        let sprite = self
            .cache
            .sprite(key)
            .ok_or_else(|| PolyvoiceError::SpriteNotFound(key.to_owned()))?;
        let base = config.clone().unwrap_or_default();
        let handle = self.add(key, config)?;
        {
            let mut sound = handle.lock();
            for (name, entry) in &sprite.spritemap {
                let mut marker_config = base.clone();
                if let Some(looping) = entry.looping {
                    marker_config.looping = looping;
                }
                sound.add_marker(
                    SoundMarker::new(name.clone(), entry.start, entry.duration())
                        .with_config(marker_config),
                );
            }
            sound.set_spritemap(sprite.spritemap);
        }
        Ok(handle)
    }

    /// Create, play and forget a sound. It destroys itself when it completes
    /// and the next update reaps it.
    ///
    /// Returns whether playback started. A sound that fails to start (for
    /// example on an unknown marker) is removed again before the error is
    /// returned.
    pub fn play(&mut self, key: &str, extra: Option<PlayExtra>) -> Result<bool> {
        let handle = self.add(key, None)?;
        let started = {
            let mut sound = handle.lock();
            arm_auto_destroy(&mut *sound);
            match &extra {
                None => sound.play(None, None),
                Some(PlayExtra::Config(config)) => sound.play(None, Some(config)),
                Some(PlayExtra::Marker(marker)) => {
                    sound.add_marker(marker.clone());
                    sound.play(Some(&marker.name), None)
                }
            }
        };
        self.settle_play(&handle, started)
    }

    /// Create, play and forget an audio sprite sound, starting at `sprite`.
    ///
    /// An explicit `config` is also the play config, so it overrides the
    /// entry's own loop flag.
    pub fn play_audio_sprite(
        &mut self,
        key: &str,
        sprite: &str,
        config: Option<SoundConfig>,
    ) -> Result<bool> {
        let handle = self.add_audio_sprite(key, config.clone())?;
        let started = {
            let mut sound = handle.lock();
            arm_auto_destroy(&mut *sound);
            sound.play(Some(sprite), config.as_ref())
        };
        self.settle_play(&handle, started)
    }

    fn settle_play(
        &mut self,
        handle: &SoundHandle<B::Sound>,
        started: Result<bool>,
    ) -> Result<bool> {
        match started {
            Ok(true) => Ok(true),
            Ok(false) => {
                debug!(key = handle.lock().key(), "fire-and-forget sound refused to start");
                self.remove(handle);
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "fire-and-forget playback failed");
                self.remove(handle);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Destroy `sound` and unregister it. Returns `false` if it is not
    /// registered.
    pub fn remove(&mut self, sound: &SoundHandle<B::Sound>) -> bool {
        let Some(index) = self.sounds.iter().position(|s| Arc::ptr_eq(s, sound)) else {
            return false;
        };
        let handle = self.sounds.remove(index);
        let mut sound = handle.lock();
        sound.destroy();
        deliver_events(&mut *sound);
        trace!(key = sound.key(), "sound removed");
        true
    }

    /// Destroy and unregister every sound created from `key`. Returns how
    /// many were removed.
    pub fn remove_by_key(&mut self, key: &str) -> usize {
        let mut removed = 0;
        for index in (0..self.sounds.len()).rev() {
            if self.sounds[index].lock().key() != key {
                continue;
            }
            let handle = self.sounds.remove(index);
            let mut sound = handle.lock();
            sound.destroy();
            deliver_events(&mut *sound);
            removed += 1;
        }
        debug!(key, removed, "removed sounds by key");
        removed
    }

    /// Destroy and unregister every sound. Returns how many were registered.
    pub fn remove_all(&mut self) -> usize {
        let sounds = std::mem::take(&mut self.sounds);
        for handle in &sounds {
            let mut sound = handle.lock();
            sound.destroy();
            deliver_events(&mut *sound);
        }
        debug!(removed = sounds.len(), "removed all sounds");
        sounds.len()
    }

    /// Stop every active sound created from `key`. Returns how many stopped.
    pub fn stop_by_key(&mut self, key: &str) -> usize {
        let mut stopped = 0;
        self.for_each_active_sound(|sound| {
            if sound.key() == key && sound.stop() {
                stopped += 1;
            }
        });
        stopped
    }

    // ------------------------------------------------------------------
    // Bulk transport
    // ------------------------------------------------------------------

    /// Pause every active sound, then emit [`ManagerEvent::Pause`] once
    pub fn pause_all(&mut self) {
        self.for_each_active_sound(|sound| {
            sound.pause();
        });
        self.events.emit(&ManagerEvent::Pause);
    }

    /// Resume every active sound, then emit [`ManagerEvent::Resume`] once
    pub fn resume_all(&mut self) {
        self.for_each_active_sound(|sound| {
            sound.resume();
        });
        self.events.emit(&ManagerEvent::Resume);
    }

    /// Stop every active sound, then emit [`ManagerEvent::Stop`] once
    pub fn stop_all(&mut self) {
        self.for_each_active_sound(|sound| {
            sound.stop();
        });
        self.events.emit(&ManagerEvent::Stop);
    }

    // ------------------------------------------------------------------
    // Global settings
    // ------------------------------------------------------------------

    /// Global playback rate
    pub fn rate(&self) -> f64 {
        self.settings.rate
    }

    /// Set the global playback rate.
    ///
    /// Every active sound recomputes its effective rate before
    /// [`ManagerEvent::Rate`] is emitted. Values are not range checked.
    pub fn set_rate(&mut self, rate: f64) -> &mut Self {
        self.settings.rate = rate;
        self.recalculate_rates();
        debug!(rate, "global rate changed");
        self.events.emit(&ManagerEvent::Rate(rate));
        self
    }

    /// Global detune in cents
    pub fn detune(&self) -> f64 {
        self.settings.detune
    }

    /// Set the global detune in cents.
    ///
    /// Stored as given; sounds clamp the combined detune when they compute
    /// their rate.
    pub fn set_detune(&mut self, detune: f64) -> &mut Self {
        self.settings.detune = detune;
        self.recalculate_rates();
        debug!(detune, "global detune changed");
        self.events.emit(&ManagerEvent::Detune(detune));
        self
    }

    fn recalculate_rates(&mut self) {
        let globals = self.settings;
        self.for_each_active_sound(|sound| sound.calculate_rate(&globals));
    }

    /// Global mute
    pub fn mute(&self) -> bool {
        self.settings.mute
    }

    /// Set the global mute
    pub fn set_mute(&mut self, mute: bool) -> &mut Self {
        self.settings.mute = mute;
        let active = self.active_handles();
        self.backend.set_mute(mute, &active);
        self.events.emit(&ManagerEvent::Mute(mute));
        self
    }

    /// Global volume
    pub fn volume(&self) -> f32 {
        self.settings.volume
    }

    /// Set the global volume. Values are not range checked.
    pub fn set_volume(&mut self, volume: f32) -> &mut Self {
        self.settings.volume = volume;
        let active = self.active_handles();
        self.backend.set_volume(volume, &active);
        self.events.emit(&ManagerEvent::Volume(volume));
        self
    }

    /// Snapshot of the global settings
    pub fn settings(&self) -> GlobalSettings {
        self.settings
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    /// Whether focus loss pauses every sound
    pub fn pause_on_blur(&self) -> bool {
        self.pause_on_blur
    }

    /// Enable or disable pausing on focus loss.
    ///
    /// Signals already received are handled under the previous setting first.
    pub fn set_pause_on_blur(&mut self, pause_on_blur: bool) -> &mut Self {
        self.process_signals();
        self.pause_on_blur = pause_on_blur;
        self
    }

    /// React to a focus signal. Ignored while pause-on-blur is disabled.
    pub fn handle_signal(&mut self, signal: AppSignal) {
        if !self.pause_on_blur {
            trace!(?signal, "focus signal ignored");
            return;
        }
        let active = self.active_handles();
        info!(?signal, active = active.len(), "application focus changed");
        match signal {
            AppSignal::Blur => {
                self.backend.on_blur(&active);
                self.events.emit(&ManagerEvent::Blur);
            }
            AppSignal::Focus => {
                self.backend.on_focus(&active);
                self.events.emit(&ManagerEvent::Focus);
            }
        }
    }

    /// Handle every focus signal received since the last call. Returns how
    /// many were handled.
    pub fn process_signals(&mut self) -> usize {
        let signals = self.signals.drain();
        for &signal in &signals {
            self.handle_signal(signal);
        }
        signals.len()
    }

    // ------------------------------------------------------------------
    // Frame step
    // ------------------------------------------------------------------

    /// Per-frame maintenance. `time` and `delta` are milliseconds.
    pub fn update(&mut self, time: f64, delta: f64) {
        self.process_signals();
        self.backend.update(time, delta);

        for handle in &self.sounds {
            deliver_events(&mut *handle.lock());
        }

        let before = self.sounds.len();
        for index in (0..self.sounds.len()).rev() {
            if self.sounds[index].lock().is_pending_remove() {
                self.sounds.remove(index);
            }
        }
        if self.sounds.len() != before {
            trace!(reaped = before - self.sounds.len(), "reaped finished sounds");
        }

        for handle in &self.sounds {
            handle.lock().update(time, delta);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// First registered sound created from `key`
    pub fn get(&self, key: &str) -> Option<SoundHandle<B::Sound>> {
        self.sounds.iter().find(|s| s.lock().key() == key).cloned()
    }

    /// Every registered sound created from `key`
    pub fn get_all(&self, key: &str) -> Vec<SoundHandle<B::Sound>> {
        self.sounds
            .iter()
            .filter(|s| s.lock().key() == key)
            .cloned()
            .collect()
    }

    /// Every active sound that is playing
    pub fn get_all_playing(&self) -> Vec<SoundHandle<B::Sound>> {
        self.sounds
            .iter()
            .filter(|s| {
                let sound = s.lock();
                !sound.is_pending_remove() && sound.is_playing()
            })
            .cloned()
            .collect()
    }

    /// Whether any active sound (optionally only those created from `key`)
    /// is playing
    pub fn is_playing(&self, key: Option<&str>) -> bool {
        self.sounds.iter().any(|s| {
            let sound = s.lock();
            !sound.is_pending_remove()
                && sound.is_playing()
                && key.map_or(true, |k| sound.key() == k)
        })
    }

    /// Call `f` on every registered sound not pending removal, in registry
    /// order
    pub fn for_each_active_sound<F>(&self, mut f: F)
    where
        F: FnMut(&mut B::Sound),
    {
        for handle in &self.sounds {
            let mut sound = handle.lock();
            if !sound.is_pending_remove() {
                f(&mut *sound);
            }
        }
    }

    fn active_handles(&self) -> Vec<SoundHandle<B::Sound>> {
        self.sounds
            .iter()
            .filter(|s| !s.lock().is_pending_remove())
            .cloned()
            .collect()
    }

    /// Number of registered sounds, including those awaiting removal
    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    /// True when no sound is registered
    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    /// Registered sounds in registry order
    pub fn sounds(&self) -> &[SoundHandle<B::Sound>] {
        &self.sounds
    }

    /// Manager-wide event channel
    pub fn events_mut(&mut self) -> &mut EventChannel<ManagerEvent> {
        &mut self.events
    }

    /// The backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Destroy every active sound, drop all listeners and release the
    /// backend. Dropping the manager has the same effect.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let sounds = std::mem::take(&mut self.sounds);
        let mut destroyed = 0;
        for handle in &sounds {
            let mut sound = handle.lock();
            if sound.is_pending_remove() {
                continue;
            }
            sound.destroy();
            deliver_events(&mut *sound);
            destroyed += 1;
        }
        self.events.clear();
        self.backend.destroy();
        debug!(destroyed, "sound manager destroyed");
    }
}

impl<B: SoundBackend> Drop for SoundManager<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// One-shot completion listener of fire-and-forget sounds.
fn arm_auto_destroy<S: Sound>(sound: &mut S) {
    sound
        .events_mut()
        .once(SoundEventKind::Complete, |_, sound| sound.destroy());
}

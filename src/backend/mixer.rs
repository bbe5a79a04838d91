//! Software audio-graph backend
//!
//! A [`MixerGraph`] holds one voice per playing sound plus a master bus.
//! Rendering pulls interleaved `f32` blocks from the graph, either from a
//! real-time output ([`AudioDevice`](crate::streaming) with the `streaming`
//! feature), an offline export, or a test.
//!
//! Voices read the clip with linear interpolation, so any playback rate
//! (and any clip sample rate) works against a fixed output rate.

use crate::cache::{AssetCache, AudioClip, Spritemap};
use crate::config::{GlobalSettings, SoundConfig};
use crate::events::SoundEvents;
use crate::manager::SoundBackend;
use crate::sound::{Sound, SoundCore, SoundHandle, SoundMarker};
use crate::{PolyvoiceError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Output format of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved output channels
    pub channels: u16,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

impl MixerConfig {
    /// Mono output at `sample_rate`
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Stereo output at `sample_rate`
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }
}

/// Identifier of a voice inside one graph
pub type VoiceId = u64;

/// Parameters of a new voice (times in seconds).
#[derive(Debug, Clone)]
pub struct VoiceParams {
    /// Audio to play
    pub clip: Arc<AudioClip>,
    /// Segment start inside the clip
    pub start: f64,
    /// Segment length
    pub duration: f64,
    /// Start offset inside the segment
    pub offset: f64,
    /// Silence before the voice starts
    pub delay: f64,
    /// Playback speed multiplier
    pub rate: f64,
    /// Voice gain (before the master bus)
    pub gain: f32,
    /// Wrap around at the segment end
    pub looping: bool,
}

/// Observable state of a voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceState {
    /// Position inside the segment, seconds
    pub position: f64,
    /// Times the voice wrapped around
    pub loops: u64,
    /// The voice reached the end of its segment and stopped
    pub ended: bool,
    /// The voice is paused
    pub paused: bool,
}

#[derive(Debug)]
struct Voice {
    clip: Arc<AudioClip>,
    /// Segment bounds in clip frames
    start: f64,
    end: f64,
    /// Read position in clip frames
    position: f64,
    /// Clip frames per output frame at rate 1
    step: f64,
    rate: f64,
    gain: f32,
    looping: bool,
    paused: bool,
    delay_frames: u64,
    loops: u64,
    ended: bool,
}

impl Voice {
    fn new(params: VoiceParams, output_rate: u32) -> Self {
        let clip_rate = params.clip.sample_rate() as f64;
        let frames = params.clip.frames() as f64;
        let start = (params.start.max(0.0) * clip_rate).min(frames);
        let end = ((params.start + params.duration.max(0.0)) * clip_rate).clamp(start, frames);
        let position = (start + params.offset.max(0.0) * clip_rate).min(end);
        Self {
            step: clip_rate / output_rate.max(1) as f64,
            delay_frames: (params.delay.max(0.0) * output_rate as f64).round() as u64,
            clip: params.clip,
            start,
            end,
            position,
            rate: params.rate,
            gain: params.gain,
            looping: params.looping,
            paused: false,
            loops: 0,
            ended: false,
        }
    }

    fn is_running(&self) -> bool {
        !self.paused && !self.ended
    }

    #[inline]
    fn sample(&self, channel: usize) -> f32 {
        let index = self.position.floor();
        let frac = (self.position - index) as f32;
        let index = index as usize;
        let a = self.clip.sample(index, channel);
        let b = if (index + 1) as f64 >= self.end {
            a
        } else {
            self.clip.sample(index + 1, channel)
        };
        a + (b - a) * frac
    }

    fn advance(&mut self) {
        self.position += self.step * self.rate.max(0.0);
        if self.position < self.end {
            return;
        }
        let length = self.end - self.start;
        if self.looping && length > 0.0 {
            while self.position >= self.end {
                self.position -= length;
                self.loops += 1;
            }
        } else {
            self.position = self.end;
            self.ended = true;
        }
    }

    fn state(&self) -> VoiceState {
        VoiceState {
            position: (self.position - self.start) / self.clip.sample_rate() as f64,
            loops: self.loops,
            ended: self.ended,
            paused: self.paused,
        }
    }
}

#[derive(Debug)]
struct GraphState {
    config: MixerConfig,
    master_mute: bool,
    master_volume: f32,
    suspended: bool,
    voices: BTreeMap<VoiceId, Voice>,
    next_id: VoiceId,
}

/// Shared mixing graph.
///
/// Cloning yields another handle to the same graph, so the render side (an
/// audio thread) and the control side (sounds) can each hold one.
#[derive(Debug, Clone)]
pub struct MixerGraph {
    state: Arc<Mutex<GraphState>>,
}

impl MixerGraph {
    /// Create an empty graph
    pub fn new(config: MixerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(GraphState {
                config,
                master_mute: false,
                master_volume: 1.0,
                suspended: false,
                voices: BTreeMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Output format
    pub fn config(&self) -> MixerConfig {
        self.state.lock().config
    }

    /// Add a running voice
    pub fn add_voice(&self, params: VoiceParams) -> VoiceId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let voice = Voice::new(params, state.config.sample_rate);
        state.voices.insert(id, voice);
        trace!(voice = id, "voice added");
        id
    }

    /// Remove a voice. Returns `false` if it does not exist.
    pub fn remove_voice(&self, id: VoiceId) -> bool {
        self.state.lock().voices.remove(&id).is_some()
    }

    /// Remove every voice
    pub fn clear(&self) {
        self.state.lock().voices.clear();
    }

    fn with_voice<R>(&self, id: VoiceId, f: impl FnOnce(&mut Voice) -> R) -> Option<R> {
        self.state.lock().voices.get_mut(&id).map(f)
    }

    /// Pause or unpause a voice
    pub fn set_voice_paused(&self, id: VoiceId, paused: bool) -> bool {
        self.with_voice(id, |v| v.paused = paused).is_some()
    }

    /// Retune a voice
    pub fn set_voice_rate(&self, id: VoiceId, rate: f64) -> bool {
        self.with_voice(id, |v| v.rate = rate).is_some()
    }

    /// Change a voice's gain
    pub fn set_voice_gain(&self, id: VoiceId, gain: f32) -> bool {
        self.with_voice(id, |v| v.gain = gain).is_some()
    }

    /// Enable or disable looping of a voice
    pub fn set_voice_loop(&self, id: VoiceId, looping: bool) -> bool {
        self.with_voice(id, |v| v.looping = looping).is_some()
    }

    /// Move a voice to `seconds` into its segment
    pub fn seek_voice(&self, id: VoiceId, seconds: f64) -> bool {
        self.with_voice(id, |v| {
            let offset = seconds.max(0.0) * v.clip.sample_rate() as f64;
            v.position = (v.start + offset).min(v.end);
            v.ended = false;
        })
        .is_some()
    }

    /// Observable state of a voice
    pub fn voice(&self, id: VoiceId) -> Option<VoiceState> {
        self.state.lock().voices.get(&id).map(Voice::state)
    }

    /// Number of voices, running or not
    pub fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Mute the master bus
    pub fn set_master_mute(&self, mute: bool) {
        self.state.lock().master_mute = mute;
    }

    /// Master bus mute
    pub fn master_mute(&self) -> bool {
        self.state.lock().master_mute
    }

    /// Set the master bus volume
    pub fn set_master_volume(&self, volume: f32) {
        self.state.lock().master_volume = volume;
    }

    /// Master bus volume
    pub fn master_volume(&self) -> f32 {
        self.state.lock().master_volume
    }

    /// Stop producing sound; voices keep their position
    pub fn suspend(&self) {
        self.state.lock().suspended = true;
    }

    /// Undo [`suspend`](Self::suspend)
    pub fn resume(&self) {
        self.state.lock().suspended = false;
    }

    /// True while suspended
    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    /// Mix the next `out.len() / channels` frames into `out` (interleaved).
    ///
    /// A suspended graph renders silence and does not advance its voices.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut state = self.state.lock();
        if state.suspended {
            return;
        }
        let channels = state.config.channels.max(1) as usize;
        let master = if state.master_mute {
            0.0
        } else {
            state.master_volume
        };

        for voice in state.voices.values_mut() {
            if !voice.is_running() {
                continue;
            }
            for frame in out.chunks_exact_mut(channels) {
                if voice.delay_frames > 0 {
                    voice.delay_frames -= 1;
                    continue;
                }
                let gain = voice.gain * master;
                for (channel, slot) in frame.iter_mut().enumerate() {
                    *slot += voice.sample(channel) * gain;
                }
                voice.advance();
                if voice.ended {
                    break;
                }
            }
        }
    }

    /// Render `frames` frames into a new buffer
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let channels = self.config().channels.max(1) as usize;
        let mut out = vec![0.0; frames * channels];
        self.render(&mut out);
        out
    }
}

/// Sound played by a voice of a [`MixerGraph`].
#[derive(Debug)]
pub struct MixerSound {
    core: SoundCore,
    clip: Arc<AudioClip>,
    graph: MixerGraph,
    voice: Option<VoiceId>,
    observed_loops: u64,
}

impl MixerSound {
    /// Create a sound for `clip` on `graph`
    pub fn new(
        key: &str,
        config: SoundConfig,
        clip: Arc<AudioClip>,
        graph: MixerGraph,
        globals: &GlobalSettings,
    ) -> Self {
        Self {
            core: SoundCore::new(key, config, clip.duration(), globals),
            clip,
            graph,
            voice: None,
            observed_loops: 0,
        }
    }

    /// Shared state
    pub fn core(&self) -> &SoundCore {
        &self.core
    }

    /// Voice currently playing this sound
    pub fn voice(&self) -> Option<VoiceId> {
        self.voice
    }

    /// Position inside the current segment, seconds
    pub fn seek(&self) -> f64 {
        self.voice
            .and_then(|id| self.graph.voice(id))
            .map_or(0.0, |state| state.position)
    }

    /// Move playback inside the current segment
    pub fn set_seek(&mut self, seconds: f64) {
        if let Some(id) = self.voice {
            self.graph.seek_voice(id, seconds);
        }
        self.core.set_seek(seconds);
    }

    /// Per-sound volume
    pub fn set_volume(&mut self, volume: f32) {
        self.core.set_volume(volume);
        self.sync_gain();
    }

    /// Per-sound mute
    pub fn set_mute(&mut self, mute: bool) {
        self.core.set_mute(mute);
        self.sync_gain();
    }

    /// Per-sound rate
    pub fn set_rate(&mut self, rate: f64) {
        self.core.set_rate(rate);
        self.sync_rate();
    }

    /// Per-sound detune in cents
    pub fn set_detune(&mut self, detune: f64) {
        self.core.set_detune(detune);
        self.sync_rate();
    }

    /// Per-sound looping
    pub fn set_loop(&mut self, looping: bool) {
        self.core.set_loop(looping);
        if let Some(id) = self.voice {
            self.graph.set_voice_loop(id, looping);
        }
    }

    fn sync_gain(&self) {
        if let Some(id) = self.voice {
            self.graph.set_voice_gain(id, self.core.local_gain());
        }
    }

    fn sync_rate(&self) {
        if let Some(id) = self.voice {
            self.graph.set_voice_rate(id, self.core.total_rate());
        }
    }

    fn release_voice(&mut self) {
        if let Some(id) = self.voice.take() {
            self.graph.remove_voice(id);
        }
        self.observed_loops = 0;
    }
}

impl Sound for MixerSound {
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
        self.release_voice();
        let current = self.core.current_config();
        let id = self.graph.add_voice(VoiceParams {
            clip: Arc::clone(&self.clip),
            start: self.core.segment_start(),
            duration: self.core.duration(),
            offset: current.seek,
            delay: current.delay,
            rate: self.core.total_rate(),
            gain: self.core.local_gain(),
            looping: current.looping,
        });
        self.voice = Some(id);
        Ok(true)
    }

    fn pause(&mut self) -> bool {
        if !self.core.pause() {
            return false;
        }
        if let Some(id) = self.voice {
            self.graph.set_voice_paused(id, true);
        }
        true
    }

    fn resume(&mut self) -> bool {
        if !self.core.resume() {
            return false;
        }
        if let Some(id) = self.voice {
            self.graph.set_voice_paused(id, false);
        }
        true
    }

    fn stop(&mut self) -> bool {
        if !self.core.stop() {
            return false;
        }
        self.release_voice();
        true
    }

    fn destroy(&mut self) {
        self.core.destroy();
        self.release_voice();
    }

    fn update(&mut self, _time: f64, _delta: f64) {
        if !self.core.is_playing() {
            return;
        }
        let Some(state) = self.voice.and_then(|id| self.graph.voice(id)) else {
            return;
        };
        while self.observed_loops < state.loops {
            self.observed_loops += 1;
            self.core.looped();
        }
        if state.ended {
            self.release_voice();
            self.core.complete();
        }
    }

    fn calculate_rate(&mut self, globals: &GlobalSettings) {
        self.core.calculate_rate(globals);
        self.sync_rate();
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

/// Factory for [`MixerSound`]s on one shared graph.
///
/// Global mute and volume drive the master bus; focus loss suspends the
/// whole graph.
#[derive(Debug)]
pub struct MixerBackend {
    graph: MixerGraph,
}

impl MixerBackend {
    /// Create a backend with a fresh graph
    pub fn new(config: MixerConfig) -> Self {
        Self::with_graph(MixerGraph::new(config))
    }

    /// Create a backend on an existing graph
    pub fn with_graph(graph: MixerGraph) -> Self {
        Self { graph }
    }

    /// The graph sounds play on
    pub fn graph(&self) -> &MixerGraph {
        &self.graph
    }
}

impl Default for MixerBackend {
    fn default() -> Self {
        Self::new(MixerConfig::default())
    }
}

impl SoundBackend for MixerBackend {
    type Sound = MixerSound;

    fn create(
        &mut self,
        cache: &dyn AssetCache,
        key: &str,
        config: &SoundConfig,
        globals: &GlobalSettings,
    ) -> Result<MixerSound> {
        let clip = cache
            .clip(key)
            .ok_or_else(|| PolyvoiceError::asset_not_found(key))?;
        self.graph.set_master_mute(globals.mute);
        self.graph.set_master_volume(globals.volume);
        Ok(MixerSound::new(
            key,
            config.clone(),
            clip,
            self.graph.clone(),
            globals,
        ))
    }

    fn on_blur(&mut self, _active: &[SoundHandle<MixerSound>]) {
        self.graph.suspend();
        debug!("mixer graph suspended");
    }

    fn on_focus(&mut self, _active: &[SoundHandle<MixerSound>]) {
        self.graph.resume();
        debug!("mixer graph resumed");
    }

    fn set_mute(&mut self, mute: bool, _active: &[SoundHandle<MixerSound>]) {
        self.graph.set_master_mute(mute);
    }

    fn set_volume(&mut self, volume: f32, _active: &[SoundHandle<MixerSound>]) {
        self.graph.set_master_volume(volume);
    }

    fn destroy(&mut self) {
        self.graph.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AudioCache;
    use crate::events::SoundEvent;
    use crate::signals::GameContext;
    use crate::{ManagerConfig, SoundManager};
    use approx::assert_relative_eq;

    /// Mono clip of constant value, 10 frames per second
    fn dc_clip(value: f32, seconds: f64) -> Arc<AudioClip> {
        let frames = (seconds * 10.0) as usize;
        Arc::new(AudioClip::new(vec![value; frames], 1, 10).unwrap())
    }

    fn params(clip: Arc<AudioClip>) -> VoiceParams {
        VoiceParams {
            duration: clip.duration(),
            clip,
            start: 0.0,
            offset: 0.0,
            delay: 0.0,
            rate: 1.0,
            gain: 1.0,
            looping: false,
        }
    }

    #[test]
    fn test_render_mixes_and_applies_master() {
        let graph = MixerGraph::new(MixerConfig::mono(10));
        graph.add_voice(params(dc_clip(0.25, 1.0)));
        graph.add_voice(params(dc_clip(0.25, 1.0)));

        let out = graph.render_frames(4);
        assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));

        graph.set_master_volume(0.5);
        let out = graph.render_frames(2);
        assert_relative_eq!(out[0], 0.25);

        graph.set_master_mute(true);
        assert!(graph.render_frames(2).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_voice_ends_at_segment_end() {
        let graph = MixerGraph::new(MixerConfig::mono(10));
        let id = graph.add_voice(params(dc_clip(1.0, 0.5)));

        let out = graph.render_frames(8);
        assert_eq!(&out[..5], &[1.0; 5]);
        assert_eq!(&out[5..], &[0.0; 3]);

        let state = graph.voice(id).unwrap();
        assert!(state.ended);
        assert_relative_eq!(state.position, 0.5);
    }

    #[test]
    fn test_delay_and_loop() {
        let graph = MixerGraph::new(MixerConfig::mono(10));
        let id = graph.add_voice(VoiceParams {
            delay: 0.2,
            looping: true,
            ..params(dc_clip(1.0, 0.3))
        });

        let out = graph.render_frames(10);
        assert_eq!(&out[..2], &[0.0, 0.0]);
        assert_eq!(&out[2..], &[1.0; 8]);
        let state = graph.voice(id).unwrap();
        assert_eq!(state.loops, 2);
        assert!(!state.ended);
    }

    #[test]
    fn test_rate_scales_progress() {
        let graph = MixerGraph::new(MixerConfig::mono(10));
        let id = graph.add_voice(VoiceParams {
            rate: 2.0,
            ..params(dc_clip(1.0, 2.0))
        });
        graph.render_frames(5);
        assert_relative_eq!(graph.voice(id).unwrap().position, 1.0);
    }

    #[test]
    fn test_suspended_graph_is_silent_and_frozen() {
        let graph = MixerGraph::new(MixerConfig::stereo(10));
        let id = graph.add_voice(params(dc_clip(1.0, 1.0)));
        graph.suspend();
        assert!(graph.render_frames(4).iter().all(|s| *s == 0.0));
        assert_eq!(graph.voice(id).unwrap().position, 0.0);

        graph.resume();
        let out = graph.render_frames(1);
        assert_eq!(out, vec![1.0, 1.0], "mono clip feeds both channels");
    }

    fn manager() -> (GameContext, SoundManager<MixerBackend>) {
        let cache = Arc::new(AudioCache::new());
        cache.insert_clip("dc", AudioClip::new(vec![1.0; 5], 1, 10).unwrap());
        let mut game = GameContext::new(cache);
        let backend = MixerBackend::new(MixerConfig::mono(10));
        let sounds = SoundManager::new(&mut game, backend, ManagerConfig::default());
        (game, sounds)
    }

    #[test]
    fn test_sound_lifecycle_drives_voice() {
        let (_game, mut sounds) = manager();
        let handle = sounds.add("dc", None).unwrap();
        let graph = sounds.backend().graph().clone();

        handle.lock().play(None, None).unwrap();
        assert_eq!(graph.voice_count(), 1);

        handle.lock().pause();
        assert!(graph.render_frames(2).iter().all(|s| *s == 0.0));
        handle.lock().resume();
        assert_eq!(graph.render_frames(1), vec![1.0]);

        handle.lock().stop();
        assert_eq!(graph.voice_count(), 0);
    }

    #[test]
    fn test_voice_end_completes_sound() {
        let (_game, mut sounds) = manager();
        let handle = sounds.add("dc", None).unwrap();
        handle.lock().play(None, None).unwrap();

        sounds.backend().graph().render_frames(6);
        sounds.update(0.0, 16.0);

        let sound = handle.lock();
        assert!(!sound.is_playing());
        assert_eq!(sound.voice(), None);
        assert_eq!(sound.core().events().pending(), &[SoundEvent::Complete]);
    }

    #[test]
    fn test_manager_settings_reach_graph() {
        let (mut game, mut sounds) = manager();
        let handle = sounds.add("dc", None).unwrap();
        handle.lock().play(None, None).unwrap();

        sounds.set_volume(0.5).set_rate(2.0);
        let graph = sounds.backend().graph().clone();
        assert_relative_eq!(graph.master_volume(), 0.5);
        graph.render_frames(1);
        assert_relative_eq!(handle.lock().seek(), 0.2);

        game.blur();
        sounds.update(0.0, 16.0);
        assert!(graph.is_suspended());
        game.focus();
        sounds.update(16.0, 16.0);
        assert!(!graph.is_suspended());
    }

    #[test]
    fn test_destroy_releases_voice() {
        let (_game, mut sounds) = manager();
        let handle = sounds.add("dc", None).unwrap();
        handle.lock().play(None, None).unwrap();
        let graph = sounds.backend().graph().clone();

        assert!(sounds.remove(&handle));
        assert_eq!(graph.voice_count(), 0);
        assert!(handle.lock().is_pending_remove());
    }
}

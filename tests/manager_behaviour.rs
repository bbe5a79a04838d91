use std::sync::Arc;

use approx::assert_relative_eq;
use parking_lot::Mutex;
use polyvoice::cache::Spritemap;
use polyvoice::events::{ManagerEvent, SoundEventKind, SoundEvents};
use polyvoice::{
    AssetCache, AudioCache, AudioClip, GameContext, GlobalSettings, ManagerConfig, PlayExtra,
    PolyvoiceError, Result, Sound, SoundBackend, SoundConfig, SoundCore, SoundHandle,
    SoundManager, SoundMarker,
};

type CallLog = Arc<Mutex<Vec<String>>>;

/// Sound that records every call the manager makes on it
#[derive(Debug)]
struct RecordingSound {
    id: usize,
    core: SoundCore,
    log: CallLog,
    destroy_during_update: bool,
}

impl RecordingSound {
    fn record(&self, call: &str) {
        self.log.lock().push(format!("{call}:{}", self.id));
    }

    fn finish(&mut self) {
        self.core.complete();
    }
}

impl Sound for RecordingSound {
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
        self.record("play");
        self.core.play(marker, config)
    }

    fn pause(&mut self) -> bool {
        self.record("pause");
        self.core.pause()
    }

    fn resume(&mut self) -> bool {
        self.record("resume");
        self.core.resume()
    }

    fn stop(&mut self) -> bool {
        self.record("stop");
        self.core.stop()
    }

    fn destroy(&mut self) {
        self.record("destroy");
        self.core.destroy();
    }

    fn update(&mut self, _time: f64, _delta: f64) {
        self.record("update");
        if self.destroy_during_update {
            self.core.destroy();
        }
    }

    fn calculate_rate(&mut self, globals: &GlobalSettings) {
        self.record("rate");
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

#[derive(Default)]
struct RecordingBackend {
    log: CallLog,
    created: usize,
}

impl SoundBackend for RecordingBackend {
    type Sound = RecordingSound;

    fn create(
        &mut self,
        cache: &dyn AssetCache,
        key: &str,
        config: &SoundConfig,
        globals: &GlobalSettings,
    ) -> Result<RecordingSound> {
        let clip = cache
            .clip(key)
            .ok_or_else(|| PolyvoiceError::asset_not_found(key))?;
        let id = self.created;
        self.created += 1;
        Ok(RecordingSound {
            id,
            core: SoundCore::new(key, config.clone(), clip.duration(), globals),
            log: Arc::clone(&self.log),
            destroy_during_update: false,
        })
    }

    fn on_blur(&mut self, active: &[SoundHandle<RecordingSound>]) {
        self.log.lock().push(format!("blur:{}", active.len()));
    }

    fn on_focus(&mut self, active: &[SoundHandle<RecordingSound>]) {
        self.log.lock().push(format!("focus:{}", active.len()));
    }

    fn set_mute(&mut self, mute: bool, active: &[SoundHandle<RecordingSound>]) {
        self.log.lock().push(format!("mute={mute}:{}", active.len()));
    }

    fn set_volume(&mut self, volume: f32, active: &[SoundHandle<RecordingSound>]) {
        self.log.lock().push(format!("volume={volume}:{}", active.len()));
    }

    fn destroy(&mut self) {
        self.log.lock().push("backend-destroy".to_string());
    }
}

const SPRITE_JSON: &str = r#"{
    "resources": ["sfx.ogg"],
    "spritemap": {
        "coin": { "start": 0.0, "end": 0.25 },
        "jump": { "start": 0.5, "end": 0.9, "loop": true }
    }
}"#;

struct Fixture {
    game: GameContext,
    sounds: SoundManager<RecordingBackend>,
    log: CallLog,
    events: Arc<Mutex<Vec<ManagerEvent>>>,
}

fn fixture() -> Fixture {
    let cache = Arc::new(AudioCache::new());
    for key in ["x", "y", "sfx"] {
        cache.insert_clip(key, AudioClip::silence(1.0, 1000));
    }
    cache.insert_sprite_json("sfx", SPRITE_JSON).unwrap();

    let backend = RecordingBackend::default();
    let log = Arc::clone(&backend.log);
    let mut game = GameContext::new(cache);
    let mut sounds = SoundManager::new(&mut game, backend, ManagerConfig::default());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    sounds
        .events_mut()
        .on_any(move |event: &ManagerEvent| sink.lock().push(*event));

    Fixture {
        game,
        sounds,
        log,
        events,
    }
}

fn calls(log: &CallLog, call: &str) -> Vec<String> {
    let prefix = format!("{call}:");
    log.lock()
        .iter()
        .filter(|entry| entry.starts_with(&prefix))
        .cloned()
        .collect()
}

fn id_of(handle: &SoundHandle<RecordingSound>) -> usize {
    handle.lock().id
}

#[test]
fn remove_by_key_removes_every_match() {
    let mut f = fixture();
    f.sounds.add("x", None).unwrap();
    let y = f.sounds.add("y", None).unwrap();
    f.sounds.add("x", None).unwrap();

    assert_eq!(f.sounds.remove_by_key("x"), 2);
    assert_eq!(f.sounds.len(), 1);
    assert!(Arc::ptr_eq(&f.sounds.sounds()[0], &y));
    assert_eq!(calls(&f.log, "destroy"), vec!["destroy:2", "destroy:0"]);
    assert_eq!(f.sounds.remove_by_key("x"), 0);
}

#[test]
fn remove_reports_whether_the_sound_was_registered() {
    let mut f = fixture();
    let sound = f.sounds.add("x", None).unwrap();

    assert!(f.sounds.remove(&sound));
    assert!(!f.sounds.remove(&sound));
    assert!(f.sounds.is_empty());
    assert_eq!(calls(&f.log, "destroy").len(), 1);
    assert!(sound.lock().is_pending_remove());
}

#[test]
fn registry_size_tracks_adds_removes_and_auto_destroys() {
    let mut f = fixture();
    let handles: Vec<_> = (0..5).map(|_| f.sounds.add("x", None).unwrap()).collect();
    f.sounds.remove(&handles[1]);
    f.sounds.remove(&handles[3]);
    f.sounds.play("y", None).unwrap();
    assert_eq!(f.sounds.len(), 4);

    let forgotten = f.sounds.get("y").unwrap();
    forgotten.lock().finish();
    f.sounds.update(0.0, 16.0);
    assert_eq!(f.sounds.len(), 3);

    let registered = f.sounds.sounds();
    for (i, a) in registered.iter().enumerate() {
        for b in &registered[i + 1..] {
            assert!(!Arc::ptr_eq(a, b), "a sound is registered twice");
        }
    }
}

#[test]
fn rate_change_recalculates_active_sounds_only() {
    let mut f = fixture();
    let a = f.sounds.add("x", None).unwrap();
    let b = f.sounds.add("x", None).unwrap();
    let gone = f.sounds.add("x", None).unwrap();
    gone.lock().destroy();

    f.sounds.set_rate(2.0);

    assert_eq!(
        calls(&f.log, "rate"),
        vec![format!("rate:{}", id_of(&a)), format!("rate:{}", id_of(&b))]
    );
    assert_eq!(f.sounds.rate(), 2.0);
    assert_eq!(*f.events.lock(), vec![ManagerEvent::Rate(2.0)]);
    assert_relative_eq!(a.lock().core.total_rate(), 2.0);
}

#[test]
fn detune_change_recalculates_and_reports_unclamped_value() {
    let mut f = fixture();
    let a = f.sounds.add("x", None).unwrap();

    f.sounds.set_detune(2400.0);

    assert_eq!(f.sounds.detune(), 2400.0);
    assert_eq!(*f.events.lock(), vec![ManagerEvent::Detune(2400.0)]);
    // per-sound rate clamps the combined detune at one octave
    assert_relative_eq!(a.lock().core.total_rate(), 2.0, epsilon = 1e-9);
}

#[test]
fn bulk_controls_touch_active_sounds_and_emit_once() {
    let mut f = fixture();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let sound = f.sounds.add("x", None).unwrap();
        sound.lock().play(None, None).unwrap();
        handles.push(sound);
    }
    handles[2].lock().destroy();

    f.sounds.pause_all();
    assert_eq!(calls(&f.log, "pause"), vec!["pause:0", "pause:1", "pause:3"]);
    assert_eq!(*f.events.lock(), vec![ManagerEvent::Pause]);

    f.sounds.resume_all();
    f.sounds.stop_all();
    assert_eq!(calls(&f.log, "resume").len(), 3);
    assert_eq!(calls(&f.log, "stop").len(), 3);
    assert_eq!(
        *f.events.lock(),
        vec![ManagerEvent::Pause, ManagerEvent::Resume, ManagerEvent::Stop]
    );
    assert!(!f.sounds.is_playing(None));
}

#[test]
fn bulk_controls_and_update_accept_empty_registry() {
    let mut f = fixture();
    f.sounds.pause_all();
    f.sounds.resume_all();
    f.sounds.stop_all();
    f.sounds.update(0.0, 16.0);
    assert_eq!(f.events.lock().len(), 3);
    assert!(f.sounds.is_empty());
}

#[test]
fn fire_and_forget_sound_is_reaped_after_completion() {
    let mut f = fixture();
    assert!(f.sounds.play("x", None).unwrap());
    let sound = f.sounds.sounds()[0].clone();
    assert!(sound.lock().is_playing());

    sound.lock().finish();
    f.sounds.update(0.0, 16.0);

    assert!(f.sounds.is_empty());
    assert!(sound.lock().is_pending_remove());
    assert_eq!(calls(&f.log, "destroy"), vec!["destroy:0"]);
}

#[test]
fn fire_and_forget_listener_is_one_shot() {
    let mut f = fixture();
    f.sounds.play("x", None).unwrap();
    let sound = f.sounds.sounds()[0].clone();
    assert_eq!(sound.lock().core.events().listener_count(SoundEventKind::Complete), 1);

    sound.lock().finish();
    f.sounds.update(0.0, 16.0);
    assert_eq!(sound.lock().core.events().listener_count(SoundEventKind::Complete), 0);
}

#[test]
fn update_reaps_before_ticking() {
    let mut f = fixture();
    let a = f.sounds.add("x", None).unwrap();
    let b = f.sounds.add("x", None).unwrap();
    let c = f.sounds.add("x", None).unwrap();
    b.lock().destroy();
    c.lock().destroy_during_update = true;

    f.sounds.update(10.0, 16.0);
    assert_eq!(
        calls(&f.log, "update"),
        vec![format!("update:{}", id_of(&a)), format!("update:{}", id_of(&c))]
    );
    assert_eq!(f.sounds.len(), 2, "a sound destroyed while ticking stays until the next frame");

    f.log.lock().clear();
    f.sounds.update(26.0, 16.0);
    assert_eq!(calls(&f.log, "update"), vec![format!("update:{}", id_of(&a))]);
    assert_eq!(f.sounds.len(), 1);
    assert!(calls(&f.log, "destroy").is_empty(), "reaping does not destroy again");
}

#[test]
fn destroy_destroys_each_active_sound_once() {
    let f = fixture();
    let mut sounds = f.sounds;
    let handles: Vec<_> = (0..3).map(|_| sounds.add("x", None).unwrap()).collect();
    sounds.play("y", None).unwrap();

    let destroyed = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&destroyed);
    handles[0]
        .lock()
        .events_mut()
        .on(SoundEventKind::Destroy, move |_, _| *counter.lock() += 1);

    sounds.destroy();

    let mut log = calls(&f.log, "destroy");
    log.sort();
    assert_eq!(log, vec!["destroy:0", "destroy:1", "destroy:2", "destroy:3"]);
    assert_eq!(*destroyed.lock(), 1);
    assert!(handles.iter().all(|h| h.lock().is_pending_remove()));
    assert!(f.log.lock().contains(&"backend-destroy".to_string()));
}

#[test]
fn destroy_skips_sounds_already_destroyed() {
    let f = fixture();
    let mut sounds = f.sounds;
    let gone = sounds.add("x", None).unwrap();
    sounds.add("y", None).unwrap();
    gone.lock().destroy();

    sounds.destroy();

    let gone_id = format!("destroy:{}", id_of(&gone));
    assert_eq!(calls(&f.log, "destroy").iter().filter(|e| **e == gone_id).count(), 1);
    assert_eq!(calls(&f.log, "destroy").len(), 2);
}

#[test]
fn dropping_the_manager_tears_it_down_once() {
    let f = fixture();
    let mut sounds = f.sounds;
    sounds.add("x", None).unwrap();
    sounds.add("y", None).unwrap();
    drop(sounds);

    assert_eq!(calls(&f.log, "destroy").len(), 2);
    assert_eq!(
        f.log.lock().iter().filter(|e| *e == "backend-destroy").count(),
        1
    );
}

#[test]
fn focus_signals_are_gated_by_pause_on_blur() {
    let mut f = fixture();
    assert_eq!(f.game.signals().subscriber_count(), 1);
    let sound = f.sounds.add("x", None).unwrap();
    sound.lock().play(None, None).unwrap();

    f.game.blur();
    f.sounds.update(0.0, 16.0);
    assert_eq!(calls(&f.log, "blur"), vec!["blur:1"]);

    f.sounds.set_pause_on_blur(false);
    f.game.focus();
    f.sounds.update(16.0, 16.0);
    assert!(calls(&f.log, "focus").is_empty());

    f.sounds.set_pause_on_blur(true);
    f.sounds.handle_signal(polyvoice::AppSignal::Focus);
    assert_eq!(calls(&f.log, "focus"), vec!["focus:1"]);
}

#[test]
fn focus_signals_use_the_setting_in_force_when_they_arrived() {
    let mut f = fixture();
    let sound = f.sounds.add("x", None).unwrap();
    sound.lock().play(None, None).unwrap();

    f.game.blur();
    f.sounds.set_pause_on_blur(false);
    f.sounds.update(0.0, 16.0);
    assert_eq!(calls(&f.log, "blur"), vec!["blur:1"]);
    assert_eq!(*f.events.lock(), vec![ManagerEvent::Blur]);

    f.game.focus();
    f.sounds.set_pause_on_blur(true);
    f.sounds.update(16.0, 16.0);
    assert!(calls(&f.log, "focus").is_empty());
}

#[test]
fn destroyed_manager_no_longer_receives_signals() {
    let mut f = fixture();
    f.sounds.destroy();
    assert_eq!(f.game.blur(), 0);
    assert_eq!(f.game.signals().subscriber_count(), 0);
}

#[test]
fn mute_and_volume_reach_backend_and_listeners() {
    let mut f = fixture();
    f.sounds.add("x", None).unwrap();
    f.sounds.set_mute(true).set_volume(0.5);

    assert!(f.sounds.mute());
    assert_eq!(f.sounds.volume(), 0.5);
    assert!(f.log.lock().contains(&"mute=true:1".to_string()));
    assert!(f.log.lock().contains(&"volume=0.5:1".to_string()));
    assert_eq!(
        *f.events.lock(),
        vec![ManagerEvent::Mute(true), ManagerEvent::Volume(0.5)]
    );
}

#[test]
fn play_with_marker_descriptor_starts_at_that_marker() {
    let mut f = fixture();
    let marker =
        SoundMarker::new("hit", 0.2, 0.3).with_config(SoundConfig::default().with_volume(0.4));
    assert!(f.sounds.play("x", Some(PlayExtra::Marker(marker))).unwrap());

    let sound = f.sounds.get("x").unwrap();
    let sound = sound.lock();
    assert_eq!(sound.core.current_marker().map(|m| m.name.as_str()), Some("hit"));
    assert_relative_eq!(sound.core.current_config().volume, 0.4);
    assert_relative_eq!(sound.core.duration(), 0.3);
}

#[test]
fn play_with_config_passes_settings_through() {
    let mut f = fixture();
    let config = SoundConfig::default().with_rate(1.5).with_loop(true);
    assert!(f.sounds.play("x", Some(config.into())).unwrap());

    let sound = f.sounds.get("x").unwrap();
    let sound = sound.lock();
    assert!(sound.core.current_config().looping);
    assert_relative_eq!(sound.core.total_rate(), 1.5);
}

#[test]
fn audio_sprite_registers_one_marker_per_entry() {
    let mut f = fixture();
    let config = SoundConfig::default().with_volume(0.7);
    let sound = f.sounds.add_audio_sprite("sfx", Some(config)).unwrap();
    let sound = sound.lock();

    assert_eq!(sound.spritemap().map(|m| m.len()), Some(2));
    let jump = sound.core.marker("jump").unwrap();
    assert_relative_eq!(jump.start, 0.5);
    assert_relative_eq!(jump.duration.unwrap(), 0.4, epsilon = 1e-9);
    let jump_config = jump.config.as_ref().unwrap();
    assert!(jump_config.looping);
    assert_relative_eq!(jump_config.volume, 0.7);
    assert!(!sound.core.marker("coin").unwrap().config.as_ref().unwrap().looping);
}

#[test]
fn audio_sprite_without_metadata_fails_without_registering() {
    let mut f = fixture();
    let err = f.sounds.add_audio_sprite("x", None).unwrap_err();
    assert!(matches!(err, PolyvoiceError::SpriteNotFound(_)));
    assert!(f.sounds.is_empty());

    let err = f.sounds.add("missing", None).unwrap_err();
    assert!(matches!(err, PolyvoiceError::AssetNotFound(_)));
    assert!(f.sounds.is_empty());
}

#[test]
fn play_audio_sprite_plays_named_region() {
    let mut f = fixture();
    assert!(f.sounds.play_audio_sprite("sfx", "coin", None).unwrap());
    let sound = f.sounds.get("sfx").unwrap();
    assert_eq!(
        sound.lock().core.current_marker().map(|m| m.name.clone()),
        Some("coin".to_string())
    );
    assert!(f.sounds.is_playing(Some("sfx")));
    assert!(!f.sounds.is_playing(Some("x")));
}

#[test]
fn play_audio_sprite_config_overrides_entry_loop_flag() {
    let mut f = fixture();
    let once = SoundConfig::default().with_loop(false);
    assert!(f.sounds.play_audio_sprite("sfx", "jump", Some(once)).unwrap());

    let sound = f.sounds.get("sfx").unwrap();
    let sound = sound.lock();
    assert!(!sound.core.current_config().looping);
    assert!(sound.core.marker("jump").unwrap().config.as_ref().unwrap().looping);
}

#[test]
fn failed_fire_and_forget_playback_is_cleaned_up() {
    let mut f = fixture();
    let err = f.sounds.play_audio_sprite("sfx", "nope", None).unwrap_err();
    assert!(matches!(err, PolyvoiceError::MarkerNotFound { .. }));
    assert!(f.sounds.is_empty());
    assert_eq!(calls(&f.log, "destroy").len(), 1);
}

#[test]
fn stop_by_key_and_remove_all() {
    let mut f = fixture();
    for key in ["x", "y", "x"] {
        f.sounds.add(key, None).unwrap().lock().play(None, None).unwrap();
    }
    assert_eq!(f.sounds.stop_by_key("x"), 2);
    assert_eq!(f.sounds.get_all_playing().len(), 1);
    assert_eq!(f.sounds.get_all("x").len(), 2);

    assert_eq!(f.sounds.remove_all(), 3);
    assert!(f.sounds.is_empty());
    assert_eq!(calls(&f.log, "destroy").len(), 3);
}

#[cfg(not(feature = "timeline"))]
fn main() {
    eprintln!(
        "polyvoice-demo requires the \"timeline\" feature. \
         Rebuild with `--features timeline` to run it."
    );
}

#[cfg(feature = "timeline")]
mod demo {
    use std::env;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use polyvoice::backend::timeline::TimelineBackend;
    use polyvoice::events::{ManagerEvent, SoundEventKind};
    use polyvoice::{
        AudioCache, AudioClip, GameContext, ManagerConfig, PlayExtra, Sound, SoundBackend,
        SoundConfig, SoundManager, SoundMarker,
    };
    use tracing::info;

    const SAMPLE_RATE: u32 = 22_050;
    const FRAME_MS: f64 = 16.0;
    const SESSION_SECONDS: f64 = 4.0;

    const SPRITE_JSON: &str = r#"{
        "resources": ["sfx.ogg"],
        "spritemap": {
            "coin":  { "start": 0.0, "end": 0.3 },
            "jump":  { "start": 0.5, "end": 0.9 },
            "alarm": { "start": 1.0, "end": 1.4, "loop": true }
        }
    }"#;

    fn init_logging() {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "polyvoice=debug,polyvoice_demo=info".into()),
            )
            .init();
    }

    fn build_cache() -> anyhow::Result<Arc<AudioCache>> {
        let cache = AudioCache::new();
        cache.insert_clip("laser", AudioClip::tone(880.0, 0.25, SAMPLE_RATE));
        cache.insert_clip("music", AudioClip::tone(220.0, 1.5, SAMPLE_RATE));

        let sfx: Vec<f32> = [(660.0, 0.5), (990.0, 0.5), (440.0, 0.5)]
            .iter()
            .flat_map(|&(freq, secs)| AudioClip::tone(freq, secs, SAMPLE_RATE).samples().to_vec())
            .collect();
        cache.insert_clip("sfx", AudioClip::new(sfx, 1, SAMPLE_RATE)?);
        cache
            .insert_sprite_json("sfx", SPRITE_JSON)
            .context("parsing demo sprite")?;
        Ok(Arc::new(cache))
    }

    /// Drive one manager through a short scripted session.
    fn run_session<B: SoundBackend>(
        game: &mut GameContext,
        mut sounds: SoundManager<B>,
        realtime: bool,
    ) -> anyhow::Result<()> {
        sounds.events_mut().on_any(|event: &ManagerEvent| info!(?event, "manager event"));

        let music_config = SoundConfig::default().with_loop(true).with_volume(0.6);
        let music = sounds.add("music", Some(music_config))?;
        {
            let mut music = music.lock();
            music
                .events_mut()
                .on(SoundEventKind::Looped, |_, sound| info!(key = sound.key(), "music looped"));
            music.play(None, None)?;
        }

        sounds.play("laser", None)?;
        let tail =
            SoundMarker::new("tail", 0.1, 0.15).with_config(SoundConfig::default().with_rate(1.5));
        sounds.play("laser", Some(PlayExtra::Marker(tail)))?;
        sounds.play_audio_sprite("sfx", "coin", None)?;
        let alarm = sounds.add_audio_sprite("sfx", None)?;
        alarm.lock().play(Some("alarm"), None)?;

        let frames = (SESSION_SECONDS * 1000.0 / FRAME_MS) as usize;
        let mut time = 0.0;
        let mut last_len = sounds.len();
        for frame in 0..frames {
            match frame {
                60 => {
                    sounds.set_rate(1.25);
                }
                90 => {
                    game.blur();
                }
                120 => {
                    game.focus();
                }
                150 => {
                    sounds.set_detune(-300.0);
                    sounds.play_audio_sprite("sfx", "jump", None)?;
                }
                200 => {
                    sounds.remove(&alarm);
                }
                _ => {}
            }

            sounds.update(time, FRAME_MS);
            time += FRAME_MS;

            if sounds.len() != last_len {
                info!(
                    time,
                    sounds = sounds.len(),
                    playing = sounds.get_all_playing().len(),
                    "registry changed"
                );
                last_len = sounds.len();
            }
            if realtime {
                std::thread::sleep(Duration::from_millis(FRAME_MS as u64));
            }
        }

        sounds.stop_all();
        sounds.destroy();
        Ok(())
    }

    #[cfg(feature = "streaming")]
    fn run_device(cache: Arc<AudioCache>) -> anyhow::Result<()> {
        use polyvoice::backend::mixer::{MixerBackend, MixerConfig};
        use polyvoice::AudioDevice;

        let backend = MixerBackend::new(MixerConfig::stereo(44_100));
        let device = AudioDevice::new(backend.graph().clone()).context("opening audio output")?;
        let mut game = GameContext::new(cache);
        let sounds = SoundManager::new(&mut game, backend, ManagerConfig::default());
        run_session(&mut game, sounds, true)?;
        device.finish();
        Ok(())
    }

    #[cfg(not(feature = "streaming"))]
    fn run_device(_cache: Arc<AudioCache>) -> anyhow::Result<()> {
        anyhow::bail!("audio output requires the \"streaming\" feature")
    }

    pub fn run() -> anyhow::Result<()> {
        init_logging();
        let cache = build_cache()?;

        if env::args().skip(1).any(|arg| arg == "--device") {
            return run_device(cache);
        }

        let mut game = GameContext::new(cache);
        let sounds = SoundManager::new(&mut game, TimelineBackend::new(), ManagerConfig::default());
        run_session(&mut game, sounds, false)
    }
}

#[cfg(feature = "timeline")]
fn main() -> anyhow::Result<()> {
    demo::run()
}

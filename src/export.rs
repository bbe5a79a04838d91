//! Offline WAV rendering of a mixer graph

use crate::backend::mixer::MixerGraph;
use crate::{PolyvoiceError, Result};
use std::path::Path;
use tracing::info;

/// Frames rendered per graph lock
const RENDER_BLOCK_FRAMES: usize = 4096;

/// Render `seconds` of `graph` into a 16-bit WAV file.
///
/// The graph advances exactly as it would under a real-time device, so
/// voices that end during the render are marked ended afterwards.
///
/// # Examples
///
/// ```no_run
/// use polyvoice::backend::mixer::{MixerConfig, MixerGraph};
/// use polyvoice::export::render_to_wav;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let graph = MixerGraph::new(MixerConfig::stereo(44_100));
/// render_to_wav(&graph, 2.0, "mix.wav")?;
/// # Ok(())
/// # }
/// ```
pub fn render_to_wav<P: AsRef<Path>>(graph: &MixerGraph, seconds: f64, path: P) -> Result<()> {
    let config = graph.config();
    let channels = config.channels.max(1) as usize;
    let total_frames = (seconds.max(0.0) * config.sample_rate as f64).round() as usize;

    let mut samples = Vec::with_capacity(total_frames * channels);
    let mut block = vec![0.0f32; RENDER_BLOCK_FRAMES * channels];
    let mut remaining = total_frames;
    while remaining > 0 {
        let frames = remaining.min(RENDER_BLOCK_FRAMES);
        let chunk = &mut block[..frames * channels];
        graph.render(chunk);
        samples.extend_from_slice(chunk);
        remaining -= frames;
    }

    info!(frames = total_frames, path = %path.as_ref().display(), "writing WAV file");
    write_wav_file(path.as_ref(), &samples, config.sample_rate, config.channels)
}

/// Write interleaved samples to a 16-bit WAV file
fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| PolyvoiceError::Export(format!("Failed to create WAV file: {}", e)))?;

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| PolyvoiceError::Export(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| PolyvoiceError::Export(format!("Failed to finalize WAV file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mixer::{MixerConfig, VoiceParams};
    use crate::cache::AudioClip;
    use std::sync::Arc;

    #[test]
    fn test_render_to_wav_writes_expected_frames() {
        let graph = MixerGraph::new(MixerConfig::stereo(8000));
        let clip = Arc::new(AudioClip::tone(440.0, 0.5, 8000));
        graph.add_voice(VoiceParams {
            duration: clip.duration(),
            clip,
            start: 0.0,
            offset: 0.0,
            delay: 0.0,
            rate: 1.0,
            gain: 1.0,
            looping: false,
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        render_to_wav(&graph, 1.0, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 8000);

        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert!(samples[..8000].iter().any(|s| *s != 0), "tone is audible");
        assert!(samples[8000..].iter().all(|s| *s == 0), "silence after the voice ends");
    }

    #[test]
    fn test_write_wav_file_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamp.wav");
        write_wav_file(&path, &[2.0, -2.0], 8000, 1).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }
}

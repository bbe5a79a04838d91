//! Audio device integration using rodio

use crate::backend::mixer::MixerGraph;
use crate::{PolyvoiceError, Result};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Frames rendered per lock of the graph
const BLOCK_FRAMES: usize = 1024;

/// Audio source that renders from a mixer graph
struct GraphSource {
    graph: MixerGraph,
    sample_rate: u32,
    channels: u16,
    finished: Arc<AtomicBool>,
    /// Last rendered block
    block: Vec<f32>,
    /// Read position in `block`
    block_pos: usize,
}

impl GraphSource {
    fn new(graph: MixerGraph, finished: Arc<AtomicBool>) -> Self {
        let config = graph.config();
        let len = BLOCK_FRAMES * config.channels.max(1) as usize;
        GraphSource {
            graph,
            sample_rate: config.sample_rate,
            channels: config.channels,
            finished,
            block: vec![0.0; len],
            block_pos: len, // render on first pull
        }
    }
}

impl Source for GraphSource {
    fn current_frame_len(&self) -> Option<usize> {
        let remaining = self.block.len().saturating_sub(self.block_pos);
        if remaining > 0 {
            Some(remaining)
        } else {
            Some(self.block.len())
        }
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for GraphSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }
        if self.block_pos >= self.block.len() {
            self.graph.render(&mut self.block);
            self.block_pos = 0;
        }
        let sample = self.block[self.block_pos];
        self.block_pos += 1;
        Some(sample)
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start rendering `graph` to it.
    ///
    /// The device uses the graph's sample rate and channel count.
    pub fn new(graph: MixerGraph) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default().map_err(|e| {
            PolyvoiceError::AudioDevice(format!("Failed to create audio stream: {}", e))
        })?;

        let sink = Sink::try_new(&stream_handle).map_err(|e| {
            PolyvoiceError::AudioDevice(format!("Failed to create audio sink: {}", e))
        })?;

        let finished = Arc::new(AtomicBool::new(false));
        let config = graph.config();
        sink.append(GraphSource::new(graph, Arc::clone(&finished)));
        debug!(sample_rate = config.sample_rate, channels = config.channels, "audio device opened");

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause output
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume output
    pub fn play(&self) {
        self.sink.play();
    }

    /// True until [`finish`](Self::finish) ends the stream
    pub fn is_running(&self) -> bool {
        !self.finished.load(Ordering::Relaxed)
    }

    /// End the stream; the device stops pulling from the graph
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mixer::{MixerConfig, VoiceParams};
    use crate::cache::AudioClip;

    fn try_audio_device(graph: MixerGraph) -> Option<AudioDevice> {
        match AudioDevice::new(graph) {
            Ok(device) => Some(device),
            Err(err) => {
                eprintln!(
                    "Skipping streaming::audio_device test (audio backend unavailable): {}",
                    err
                );
                None
            }
        }
    }

    #[test]
    fn test_audio_device_creation() {
        let Some(device) = try_audio_device(MixerGraph::new(MixerConfig::default())) else {
            return;
        };
        assert!(device.is_running());
        device.pause();
        device.play();
        device.finish();
        assert!(!device.is_running());
    }

    #[test]
    fn test_graph_source_reports_graph_format() {
        let graph = MixerGraph::new(MixerConfig::mono(22_050));
        let source = GraphSource::new(graph, Arc::new(AtomicBool::new(false)));
        assert_eq!(source.sample_rate(), 22_050);
        assert_eq!(source.channels(), 1);
        assert_eq!(source.current_frame_len(), Some(BLOCK_FRAMES));
    }

    #[test]
    fn test_graph_source_pulls_rendered_samples() {
        let graph = MixerGraph::new(MixerConfig::mono(10));
        let clip = Arc::new(AudioClip::new(vec![0.5; 4], 1, 10).unwrap());
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

        let mut source = GraphSource::new(graph, Arc::new(AtomicBool::new(false)));
        let pulled: Vec<f32> = source.by_ref().take(6).collect();
        assert_eq!(pulled, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_graph_source_finished_signal() {
        let finished = Arc::new(AtomicBool::new(false));
        let graph = MixerGraph::new(MixerConfig::default());
        let mut source = GraphSource::new(graph, Arc::clone(&finished));
        assert_eq!(source.next(), Some(0.0));
        finished.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }
}

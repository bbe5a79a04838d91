//! Real-time output of a mixer graph
//!
//! [`AudioDevice`] opens the default output with rodio and plays a source
//! that pulls fixed-size blocks from a [`MixerGraph`]. The graph stays
//! shared: sounds keep adding and steering voices while the device renders.

mod audio_device;

pub use audio_device::AudioDevice;

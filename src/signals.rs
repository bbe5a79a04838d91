//! Application focus signals and game context
//!
//! The host application forwards window focus changes to an [`AppSignals`]
//! source. Each sound manager subscribes once when it is created and drains
//! its [`SignalReceiver`] at the start of every update. Dropping the manager
//! drops the receiver; the source prunes it on the next emit, so a destroyed
//! manager never sees another signal.

use crate::cache::AssetCache;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Focus transition of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppSignal {
    /// The application lost focus (window hidden, tab switched, ...)
    Blur,
    /// The application regained focus
    Focus,
}

/// Fan-out source of [`AppSignal`]s.
#[derive(Debug, Default)]
pub struct AppSignals {
    subscribers: Vec<Sender<AppSignal>>,
}

impl AppSignals {
    /// Create a source with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self) -> SignalReceiver {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        SignalReceiver { rx }
    }

    /// Send `signal` to every live subscriber. Returns how many received it.
    pub fn emit(&mut self, signal: AppSignal) -> usize {
        self.subscribers.retain(|tx| tx.send(signal).is_ok());
        self.subscribers.len()
    }

    /// Shorthand for `emit(AppSignal::Blur)`
    pub fn blur(&mut self) -> usize {
        self.emit(AppSignal::Blur)
    }

    /// Shorthand for `emit(AppSignal::Focus)`
    pub fn focus(&mut self) -> usize {
        self.emit(AppSignal::Focus)
    }

    /// Number of subscribers that were alive at the last emit
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Receiving end of an [`AppSignals`] subscription.
#[derive(Debug)]
pub struct SignalReceiver {
    rx: Receiver<AppSignal>,
}

impl SignalReceiver {
    /// Take every signal received since the last call, oldest first
    pub fn drain(&self) -> Vec<AppSignal> {
        self.rx.try_iter().collect()
    }
}

/// Application context a sound manager binds to.
pub struct GameContext {
    cache: Arc<dyn AssetCache>,
    signals: AppSignals,
}

impl GameContext {
    /// Create a context around an asset cache
    pub fn new(cache: Arc<dyn AssetCache>) -> Self {
        Self {
            cache,
            signals: AppSignals::new(),
        }
    }

    /// Shared asset cache
    pub fn cache(&self) -> &Arc<dyn AssetCache> {
        &self.cache
    }

    /// Focus signal source
    pub fn signals(&self) -> &AppSignals {
        &self.signals
    }

    /// Focus signal source, for subscribing or emitting
    pub fn signals_mut(&mut self) -> &mut AppSignals {
        &mut self.signals
    }

    /// Notify subscribers that the application lost focus
    pub fn blur(&mut self) -> usize {
        self.signals.blur()
    }

    /// Notify subscribers that the application regained focus
    pub fn focus(&mut self) -> usize {
        self.signals.focus()
    }
}

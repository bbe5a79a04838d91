//! Event channels
//!
//! A small typed observer used in two places:
//! - every [`SoundManager`](crate::SoundManager) owns an
//!   `EventChannel<ManagerEvent>` for manager-wide notifications
//! - every sound owns a [`SoundEvents`] mailbox; sounds only queue events and
//!   the manager delivers them during its next update, handing each listener
//!   the sound that fired the event
//!
//! Listeners subscribe either persistently ([`EventChannel::on`]) or for a
//! single delivery ([`EventChannel::once`]). A one-shot listener is
//! unregistered before it runs and is never re-armed.

use crate::sound::Sound;
use std::fmt::Debug;

/// An event with a fieldless discriminant used for subscription filters.
pub trait Event {
    /// Discriminant type listeners filter on
    type Kind: Copy + Eq + Debug;

    /// Discriminant of this event
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Callback<E, C> = Box<dyn FnMut(&E, &mut C) + Send>;

struct Listener<E: Event, C: ?Sized> {
    id: ListenerId,
    kind: Option<E::Kind>,
    once: bool,
    callback: Callback<E, C>,
}

impl<E: Event, C: ?Sized> Listener<E, C> {
    fn matches(&self, kind: E::Kind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }
}

/// Ordered list of listeners for one event type.
///
/// `C` is the context handed to listeners next to the event. Channels with
/// no context (`C = ()`) get the closure-only `on`/`once`/`emit` helpers.
pub struct EventChannel<E: Event, C: ?Sized = ()> {
    listeners: Vec<Listener<E, C>>,
    next_id: u64,
}

impl<E: Event, C: ?Sized> Default for EventChannel<E, C> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<E: Event, C: ?Sized> Debug for EventChannel<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<E: Event, C: ?Sized> EventChannel<E, C> {
    /// Create an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &mut self,
        kind: Option<E::Kind>,
        once: bool,
        callback: Callback<E, C>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push(Listener {
            id,
            kind,
            once,
            callback,
        });
        id
    }

    /// Subscribe to every event of `kind`, with access to the context
    pub fn on_with<F>(&mut self, kind: E::Kind, callback: F) -> ListenerId
    where
        F: FnMut(&E, &mut C) + Send + 'static,
    {
        self.register(Some(kind), false, Box::new(callback))
    }

    /// Subscribe to the next event of `kind` only, with access to the context
    pub fn once_with<F>(&mut self, kind: E::Kind, callback: F) -> ListenerId
    where
        F: FnMut(&E, &mut C) + Send + 'static,
    {
        self.register(Some(kind), true, Box::new(callback))
    }

    /// Subscribe to all events, with access to the context
    pub fn on_any_with<F>(&mut self, callback: F) -> ListenerId
    where
        F: FnMut(&E, &mut C) + Send + 'static,
    {
        self.register(None, false, Box::new(callback))
    }

    /// Remove a listener. Returns `false` if it was not registered
    /// (already removed, or a one-shot listener that already fired).
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    /// Remove every listener
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Number of listeners that would receive an event of `kind`
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.iter().filter(|l| l.matches(kind)).count()
    }

    /// Total number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// True when no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `event` to every matching listener in subscription order.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit_with(&mut self, event: &E, ctx: &mut C) -> usize {
        let kind = event.kind();
        let mut fired = 0;
        let mut i = 0;
        while i < self.listeners.len() {
            if !self.listeners[i].matches(kind) {
                i += 1;
                continue;
            }
            fired += 1;
            if self.listeners[i].once {
                let mut listener = self.listeners.remove(i);
                (listener.callback)(event, ctx);
            } else {
                (self.listeners[i].callback)(event, ctx);
                i += 1;
            }
        }
        fired
    }

    fn ids(&self) -> impl Iterator<Item = ListenerId> + '_ {
        self.listeners.iter().map(|l| l.id)
    }

    /// Move all listeners out, leaving an empty channel that keeps allocating
    /// fresh ids.
    fn split_off(&mut self) -> Self {
        Self {
            listeners: std::mem::take(&mut self.listeners),
            next_id: self.next_id,
        }
    }

    /// Put listeners taken with `split_off` back in front of any registered
    /// in the meantime.
    fn absorb(&mut self, mut detached: Self) {
        detached.listeners.append(&mut self.listeners);
        self.listeners = detached.listeners;
        self.next_id = self.next_id.max(detached.next_id);
    }
}

impl<E: Event + 'static> EventChannel<E, ()> {
    /// Subscribe to every event of `kind`
    pub fn on<F>(&mut self, kind: E::Kind, mut callback: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.on_with(kind, move |event, _| callback(event))
    }

    /// Subscribe to the next event of `kind` only
    pub fn once<F>(&mut self, kind: E::Kind, mut callback: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.once_with(kind, move |event, _| callback(event))
    }

    /// Subscribe to all events
    pub fn on_any<F>(&mut self, mut callback: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.on_any_with(move |event, _| callback(event))
    }

    /// Deliver `event` to every matching listener
    pub fn emit(&mut self, event: &E) -> usize {
        self.emit_with(event, &mut ())
    }
}

/// Manager-wide notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManagerEvent {
    /// `pause_all` finished pausing every active sound
    Pause,
    /// `resume_all` finished resuming every active sound
    Resume,
    /// `stop_all` finished stopping every active sound
    Stop,
    /// Global rate changed (new value)
    Rate(f64),
    /// Global detune changed (new value, cents)
    Detune(f64),
    /// Global mute changed
    Mute(bool),
    /// Global volume changed
    Volume(f32),
    /// Sounds were paused because the application lost focus
    Blur,
    /// Sounds were resumed because the application regained focus
    Focus,
}

/// Discriminant of [`ManagerEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerEventKind {
    /// See [`ManagerEvent::Pause`]
    Pause,
    /// See [`ManagerEvent::Resume`]
    Resume,
    /// See [`ManagerEvent::Stop`]
    Stop,
    /// See [`ManagerEvent::Rate`]
    Rate,
    /// See [`ManagerEvent::Detune`]
    Detune,
    /// See [`ManagerEvent::Mute`]
    Mute,
    /// See [`ManagerEvent::Volume`]
    Volume,
    /// See [`ManagerEvent::Blur`]
    Blur,
    /// See [`ManagerEvent::Focus`]
    Focus,
}

impl Event for ManagerEvent {
    type Kind = ManagerEventKind;

    fn kind(&self) -> ManagerEventKind {
        match self {
            ManagerEvent::Pause => ManagerEventKind::Pause,
            ManagerEvent::Resume => ManagerEventKind::Resume,
            ManagerEvent::Stop => ManagerEventKind::Stop,
            ManagerEvent::Rate(_) => ManagerEventKind::Rate,
            ManagerEvent::Detune(_) => ManagerEventKind::Detune,
            ManagerEvent::Mute(_) => ManagerEventKind::Mute,
            ManagerEvent::Volume(_) => ManagerEventKind::Volume,
            ManagerEvent::Blur => ManagerEventKind::Blur,
            ManagerEvent::Focus => ManagerEventKind::Focus,
        }
    }
}

/// Per-sound notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoundEvent {
    /// Playback started
    Play,
    /// Playback paused
    Pause,
    /// Playback resumed
    Resume,
    /// Playback stopped
    Stop,
    /// Playback reached the end of the sound (or marker) without looping
    Complete,
    /// A looping sound wrapped around to its start
    Looped,
    /// The sound was destroyed; no further events follow
    Destroy,
    /// Per-sound mute changed
    Mute(bool),
    /// Per-sound volume changed
    Volume(f32),
    /// Per-sound rate changed
    Rate(f64),
    /// Per-sound detune changed
    Detune(f64),
    /// Playback position changed by a seek (seconds)
    Seek(f64),
    /// Looping toggled
    Loop(bool),
}

/// Discriminant of [`SoundEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundEventKind {
    /// See [`SoundEvent::Play`]
    Play,
    /// See [`SoundEvent::Pause`]
    Pause,
    /// See [`SoundEvent::Resume`]
    Resume,
    /// See [`SoundEvent::Stop`]
    Stop,
    /// See [`SoundEvent::Complete`]
    Complete,
    /// See [`SoundEvent::Looped`]
    Looped,
    /// See [`SoundEvent::Destroy`]
    Destroy,
    /// See [`SoundEvent::Mute`]
    Mute,
    /// See [`SoundEvent::Volume`]
    Volume,
    /// See [`SoundEvent::Rate`]
    Rate,
    /// See [`SoundEvent::Detune`]
    Detune,
    /// See [`SoundEvent::Seek`]
    Seek,
    /// See [`SoundEvent::Loop`]
    Loop,
}

impl Event for SoundEvent {
    type Kind = SoundEventKind;

    fn kind(&self) -> SoundEventKind {
        match self {
            SoundEvent::Play => SoundEventKind::Play,
            SoundEvent::Pause => SoundEventKind::Pause,
            SoundEvent::Resume => SoundEventKind::Resume,
            SoundEvent::Stop => SoundEventKind::Stop,
            SoundEvent::Complete => SoundEventKind::Complete,
            SoundEvent::Looped => SoundEventKind::Looped,
            SoundEvent::Destroy => SoundEventKind::Destroy,
            SoundEvent::Mute(_) => SoundEventKind::Mute,
            SoundEvent::Volume(_) => SoundEventKind::Volume,
            SoundEvent::Rate(_) => SoundEventKind::Rate,
            SoundEvent::Detune(_) => SoundEventKind::Detune,
            SoundEvent::Seek(_) => SoundEventKind::Seek,
            SoundEvent::Loop(_) => SoundEventKind::Loop,
        }
    }
}

/// Listener channel whose callbacks receive the sound that fired the event.
pub type SoundListeners = EventChannel<SoundEvent, dyn Sound>;

/// Mailbox of a single sound: queued events plus their listeners.
///
/// Sounds call [`push`](Self::push) while changing state; listeners run
/// later, when [`deliver_events`](crate::sound::deliver_events) drains the
/// queue (the manager does so at the start of every update).
#[derive(Debug, Default)]
pub struct SoundEvents {
    queue: Vec<SoundEvent>,
    listeners: SoundListeners,
    detached: bool,
    detached_ids: Vec<ListenerId>,
    removed_while_detached: Vec<ListenerId>,
    closed: bool,
}

impl SoundEvents {
    /// Create an empty mailbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event of `kind`
    pub fn on<F>(&mut self, kind: SoundEventKind, callback: F) -> ListenerId
    where
        F: FnMut(&SoundEvent, &mut (dyn Sound + 'static)) + Send + 'static,
    {
        self.listeners.on_with(kind, callback)
    }

    /// Subscribe to the next event of `kind` only
    pub fn once<F>(&mut self, kind: SoundEventKind, callback: F) -> ListenerId
    where
        F: FnMut(&SoundEvent, &mut (dyn Sound + 'static)) + Send + 'static,
    {
        self.listeners.once_with(kind, callback)
    }

    /// Subscribe to all events
    pub fn on_any<F>(&mut self, callback: F) -> ListenerId
    where
        F: FnMut(&SoundEvent, &mut (dyn Sound + 'static)) + Send + 'static,
    {
        self.listeners.on_any_with(callback)
    }

    /// Unsubscribe a listener. Returns `false` if it is not registered.
    ///
    /// During delivery, a one-shot listener that already fired in the
    /// current round still reports `true`.
    pub fn off(&mut self, id: ListenerId) -> bool {
        if self.listeners.off(id) {
            return true;
        }
        if self.detached
            && self.detached_ids.contains(&id)
            && !self.removed_while_detached.contains(&id)
        {
            // The listener may be running right now; drop it on reattach.
            self.removed_while_detached.push(id);
            return true;
        }
        false
    }

    /// Queue an event for delivery. Ignored once the mailbox is closed.
    pub fn push(&mut self, event: SoundEvent) {
        if !self.closed {
            self.queue.push(event);
        }
    }

    /// Events waiting for delivery
    pub fn pending(&self) -> &[SoundEvent] {
        &self.queue
    }

    /// Number of listeners that would receive an event of `kind`
    pub fn listener_count(&self, kind: SoundEventKind) -> usize {
        self.listeners.listener_count(kind)
    }

    /// Stop accepting events. Listeners are dropped after the already
    /// queued events (including `Destroy`) have been delivered.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// True once [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn detach(&mut self) -> (Vec<SoundEvent>, SoundListeners) {
        self.detached = true;
        let listeners = self.listeners.split_off();
        self.detached_ids = listeners.ids().collect();
        (std::mem::take(&mut self.queue), listeners)
    }

    pub(crate) fn reattach(&mut self, mut listeners: SoundListeners) {
        for id in self.removed_while_detached.drain(..) {
            listeners.off(id);
        }
        self.listeners.absorb(listeners);
        self.detached_ids.clear();
        self.detached = false;
    }

    pub(crate) fn release_if_closed(&mut self) {
        if self.closed && self.queue.is_empty() {
            self.listeners.clear();
        }
    }
}

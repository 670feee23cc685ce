//! Application state
//!
//! Single source of truth for the conversation and the companion's status
//! flags. Every mutation publishes a [`StateEvent`] so a front end can render
//! without polling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::chat::{Message, Source};

/// Capacity of the state event channel
const EVENT_CAPACITY: usize = 256;

/// Avatar emotion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Concerned,
    Thinking,
}

/// Status flags derived from the latest chat or live event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Flags {
    pub emotion: Emotion,
    /// Assistant output (text or audio) is being produced
    pub speaking: bool,
    /// A chat response is in flight
    pub thinking: bool,
    /// A live voice session is open
    pub live: bool,
}

/// Change notification published on every mutation
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// A message was appended to the conversation
    MessageAppended(Message),
    /// Text was appended to an existing message
    TextAppended { id: String, fragment: String },
    /// Citations on a message changed
    SourcesUpdated { id: String, sources: Vec<Source> },
    /// Status flags changed
    FlagsChanged(Flags),
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<Message>,
    flags: Flags,
}

/// Shared handle to the application state
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<StateEvent>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Create empty state
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
        }
    }

    /// Subscribe to state change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: StateEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Snapshot of all messages in order
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Number of messages
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Current status flags
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.lock().flags
    }

    /// Append a message and return its ID
    pub fn append(&self, message: Message) -> String {
        let id = message.id.clone();
        self.lock().messages.push(message.clone());
        self.publish(StateEvent::MessageAppended(message));
        id
    }

    /// Append a text fragment to the message with `id`
    ///
    /// Returns `false` if no such message exists.
    pub fn append_text(&self, id: &str, fragment: &str) -> bool {
        {
            let mut inner = self.lock();
            let Some(message) = inner.messages.iter_mut().rev().find(|m| m.id == id) else {
                return false;
            };
            message.text.push_str(fragment);
        }
        self.publish(StateEvent::TextAppended {
            id: id.to_string(),
            fragment: fragment.to_string(),
        });
        true
    }

    /// Merge citations into the message with `id`
    pub fn merge_sources(&self, id: &str, sources: Vec<Source>) {
        if sources.is_empty() {
            return;
        }
        let merged = {
            let mut inner = self.lock();
            let Some(message) = inner.messages.iter_mut().rev().find(|m| m.id == id) else {
                return;
            };
            let before = message.sources.len();
            message.merge_sources(sources);
            (message.sources.len() != before).then(|| message.sources.clone())
        };
        if let Some(sources) = merged {
            self.publish(StateEvent::SourcesUpdated {
                id: id.to_string(),
                sources,
            });
        }
    }

    /// Mutate the flags, publishing only when something changed
    pub fn update_flags(&self, f: impl FnOnce(&mut Flags)) {
        let changed = {
            let mut inner = self.lock();
            let before = inner.flags;
            f(&mut inner.flags);
            (inner.flags != before).then_some(inner.flags)
        };
        if let Some(flags) = changed {
            self.publish(StateEvent::FlagsChanged(flags));
        }
    }

    pub fn set_emotion(&self, emotion: Emotion) {
        self.update_flags(|f| f.emotion = emotion);
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.update_flags(|f| f.speaking = speaking);
    }

    pub fn set_thinking(&self, thinking: bool) {
        self.update_flags(|f| f.thinking = thinking);
    }

    pub fn set_live(&self, live: bool) {
        self.update_flags(|f| f.live = live);
    }

    /// Atomically claim the "thinking" flag
    ///
    /// Returns `false` if a response is already in flight.
    pub fn try_begin_thinking(&self) -> bool {
        let flags = {
            let mut inner = self.lock();
            if inner.flags.thinking {
                return false;
            }
            inner.flags.thinking = true;
            inner.flags.emotion = Emotion::Thinking;
            inner.flags
        };
        self.publish(StateEvent::FlagsChanged(flags));
        true
    }
}

//! Per-agent conversations: ordered message logs plus the transient widget state
//! (round-trip phase, pending suggestions) and the active-agent selector.
//!
//! Every mutation emits a [`WidgetEvent`] on a broadcast channel; presentation layers
//! subscribe and re-render. Nothing here renders or performs I/O.

use crate::agents::{AgentKey, AgentRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Message id, unique and increasing within one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

/// Visitor rating of an agent message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    #[default]
    None,
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
    pub feedback: Feedback,
}

/// Round-trip phase of one conversation. Settled/failed round-trips return straight to idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    /// A round-trip with this sequence number is in flight.
    Sending(u64),
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetEvent {
    MessagesChanged(AgentKey),
    LoadingChanged(AgentKey, bool),
    SuggestionsChanged(AgentKey),
    ActiveChanged(AgentKey),
    /// Every conversation was cleared (widget closed).
    Reset,
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    pending_suggestions: Vec<String>,
    phase: Phase,
    next_id: u64,
}

impl Conversation {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending_suggestions(&self) -> &[String] {
        &self.pending_suggestions
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Sending(_))
    }

    fn push(&mut self, sender: Sender, text: String) -> MessageId {
        self.next_id += 1;
        let id = MessageId(self.next_id);
        self.messages.push(Message {
            id,
            text,
            sender,
            created_at: Utc::now(),
            feedback: Feedback::None,
        });
        id
    }
}

/// Serializable view of one conversation for rendering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub agent: AgentKey,
    pub title: String,
    pub active: bool,
    pub loading: bool,
    pub messages: Vec<Message>,
    pub pending_suggestions: Vec<String>,
}

/// All conversations of one widget session.
pub struct ConversationStore {
    registry: AgentRegistry,
    conversations: BTreeMap<AgentKey, Conversation>,
    active: AgentKey,
    next_round_trip: u64,
    events: broadcast::Sender<WidgetEvent>,
}

impl ConversationStore {
    pub fn new(registry: AgentRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            conversations: BTreeMap::new(),
            active: AgentKey::default(),
            next_round_trip: 0,
            events,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WidgetEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn active(&self) -> AgentKey {
        self.active
    }

    /// The conversation for `key`, if it has been created.
    pub fn conversation(&self, key: AgentKey) -> Option<&Conversation> {
        self.conversations.get(&key)
    }

    fn entry(&mut self, key: AgentKey) -> &mut Conversation {
        self.conversations.entry(key).or_default()
    }

    pub fn is_loading(&self, key: AgentKey) -> bool {
        self.conversation(key).is_some_and(Conversation::is_loading)
    }

    pub fn pending_suggestions(&self, key: AgentKey) -> &[String] {
        self.conversation(key)
            .map(Conversation::pending_suggestions)
            .unwrap_or(&[])
    }

    pub fn messages(&self, key: AgentKey) -> &[Message] {
        self.conversation(key).map(Conversation::messages).unwrap_or(&[])
    }

    /// Make `key` the active conversation, seeding the welcome message and initial
    /// suggestions if it has no messages yet. Reactivating a populated conversation
    /// only moves the active pointer.
    pub fn activate(&mut self, key: AgentKey) {
        if self.active != key {
            self.active = key;
            self.emit(WidgetEvent::ActiveChanged(key));
        }
        if !self.messages(key).is_empty() {
            return;
        }
        let profile = self.registry.profile(key);
        let welcome = profile.welcome_text.clone();
        let suggestions = profile.initial_suggestions.clone();
        let conv = self.entry(key);
        conv.push(Sender::Agent, welcome);
        conv.pending_suggestions = suggestions;
        log::debug!("conversation {}: seeded welcome message", key);
        self.emit(WidgetEvent::MessagesChanged(key));
        self.emit(WidgetEvent::SuggestionsChanged(key));
    }

    /// Append a user message. Blank text is ignored and returns None.
    pub fn append_user(&mut self, key: AgentKey, text: &str) -> Option<MessageId> {
        let text = text.trim();
        if text.is_empty() {
            log::debug!("conversation {}: ignoring blank user message", key);
            return None;
        }
        let id = self.entry(key).push(Sender::User, text.to_string());
        self.emit(WidgetEvent::MessagesChanged(key));
        Some(id)
    }

    /// Append an agent message and replace the pending suggestions with `followups`.
    pub fn append_agent(&mut self, key: AgentKey, text: &str, followups: Vec<String>) -> MessageId {
        let conv = self.entry(key);
        let id = conv.push(Sender::Agent, text.to_string());
        conv.pending_suggestions = followups;
        self.emit(WidgetEvent::MessagesChanged(key));
        self.emit(WidgetEvent::SuggestionsChanged(key));
        id
    }

    /// Append the agent message that closes round-trip `seq`. The message always lands;
    /// suggestions are replaced only while `seq` is still the round-trip in flight, so a
    /// reply outliving a reset never fills the suggestions of a newer round-trip.
    pub(crate) fn append_reply(
        &mut self,
        key: AgentKey,
        seq: u64,
        text: &str,
        followups: Vec<String>,
    ) -> MessageId {
        let conv = self.entry(key);
        let id = conv.push(Sender::Agent, text.to_string());
        let current = conv.phase == Phase::Sending(seq);
        if current {
            conv.pending_suggestions = followups;
        }
        self.emit(WidgetEvent::MessagesChanged(key));
        if current {
            self.emit(WidgetEvent::SuggestionsChanged(key));
        } else {
            log::debug!("conversation {}: stale round-trip {}, suggestions kept", key, seq);
        }
        id
    }

    /// Toggle feedback on an agent message: the same value twice clears it, the
    /// opposite value overwrites. Unknown ids and user messages are ignored (returns false).
    pub fn set_feedback(&mut self, key: AgentKey, id: MessageId, value: Feedback) -> bool {
        let Some(message) = self
            .conversations
            .get_mut(&key)
            .and_then(|c| c.messages.iter_mut().find(|m| m.id == id))
        else {
            log::debug!("conversation {}: feedback for unknown message {}", key, id.0);
            return false;
        };
        if message.sender != Sender::Agent {
            log::debug!("conversation {}: feedback on user message {} ignored", key, id.0);
            return false;
        }
        message.feedback = if message.feedback == value {
            Feedback::None
        } else {
            value
        };
        self.emit(WidgetEvent::MessagesChanged(key));
        true
    }

    /// Clear every conversation's log and transient state (widget closed).
    /// Message ids keep increasing so stale ids never match new messages.
    pub fn reset_all(&mut self) {
        let keys: Vec<AgentKey> = self.conversations.keys().copied().collect();
        for conv in self.conversations.values_mut() {
            conv.messages.clear();
            conv.pending_suggestions.clear();
            conv.phase = Phase::Idle;
        }
        log::debug!("all conversations reset");
        self.emit(WidgetEvent::Reset);
        for key in keys {
            self.emit(WidgetEvent::MessagesChanged(key));
            self.emit(WidgetEvent::LoadingChanged(key, false));
            self.emit(WidgetEvent::SuggestionsChanged(key));
        }
    }

    /// Idle -> Sending: clears pending suggestions, raises the loading flag and returns
    /// the round-trip sequence number. None if a round-trip is already in flight.
    pub(crate) fn start_sending(&mut self, key: AgentKey) -> Option<u64> {
        if self.is_loading(key) {
            return None;
        }
        self.next_round_trip += 1;
        let seq = self.next_round_trip;
        let conv = self.entry(key);
        conv.phase = Phase::Sending(seq);
        conv.pending_suggestions.clear();
        self.emit(WidgetEvent::SuggestionsChanged(key));
        self.emit(WidgetEvent::LoadingChanged(key, true));
        Some(seq)
    }

    /// Return to Idle if round-trip `seq` is still the one in flight.
    pub(crate) fn finish_sending(&mut self, key: AgentKey, seq: u64) {
        let conv = self.entry(key);
        if conv.phase != Phase::Sending(seq) {
            log::debug!("conversation {}: round-trip {} settled after reset", key, seq);
            return;
        }
        conv.phase = Phase::Idle;
        self.emit(WidgetEvent::LoadingChanged(key, false));
    }

    pub fn snapshot(&self, key: AgentKey) -> ConversationSnapshot {
        ConversationSnapshot {
            agent: key,
            title: self.registry.profile(key).display_title.clone(),
            active: self.active == key,
            loading: self.is_loading(key),
            messages: self.messages(key).to_vec(),
            pending_suggestions: self.pending_suggestions(key).to_vec(),
        }
    }
}

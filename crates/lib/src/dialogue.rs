//! Dialogue controller: runs one round-trip per submission.
//!
//! `Idle -> Sending -> (Settled | Failed) -> Idle`, tracked per conversation. A submission
//! appends the user message and raises the loading flag, the transport is awaited without
//! holding the store lock, and the result (normalized reply or an apology) is written into
//! the conversation the round-trip was issued against, whichever agent is active by then.
//! Round-trips for different agents may be in flight at the same time.

use crate::agents::{AgentKey, AgentRegistry};
use crate::conversation::{
    ConversationSnapshot, ConversationStore, Feedback, MessageId, Sender, WidgetEvent,
};
use crate::normalize::{normalize, NormalizedReply};
use crate::transport::{AgentEnvelope, AgentRequest, AgentTransport, TransportError};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Shown when the backend answered but reported failure.
pub const BACKEND_APOLOGY: &str =
    "Sorry, I couldn't process your request right now. Please try again.";

/// Shown when the backend could not be reached or answered garbage.
pub const CONNECTIVITY_APOLOGY: &str =
    "Sorry, I'm having trouble connecting right now. Please check your connection and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backend responded without `success: true` and a payload.
    Backend,
    /// Network error, timeout, non-2xx status or malformed JSON.
    Transport,
}

/// How a round-trip ended. Either way the conversation is back to idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundTripOutcome {
    Settled(NormalizedReply),
    Failed(FailureKind),
}

/// An accepted submission whose transport call has not run yet.
///
/// Dropping it before it settles (an aborted `complete`, a panicking transport, a caller
/// that never completes it) returns its conversation to Idle.
pub struct PendingRoundTrip {
    key: AgentKey,
    seq: u64,
    request: AgentRequest,
    /// No user message preceded this one in the conversation.
    first_exchange: bool,
    /// Set until the round-trip has been finished through the store.
    store: Option<Arc<RwLock<ConversationStore>>>,
}

impl PendingRoundTrip {
    pub fn agent(&self) -> AgentKey {
        self.key
    }

    pub fn request(&self) -> &AgentRequest {
        &self.request
    }
}

impl Drop for PendingRoundTrip {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        let (key, seq) = (self.key, self.seq);
        log::debug!("dialogue {}: round-trip {} abandoned", key, seq);
        if let Ok(mut guard) = store.try_write() {
            guard.finish_sending(key, seq);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    store.write().await.finish_sending(key, seq);
                });
            }
            Err(_) => log::warn!(
                "dialogue {}: round-trip {} abandoned outside a runtime, loading flag left set",
                key,
                seq
            ),
        }
    }
}

/// One widget session: its conversations plus the transport they share. Cheap to clone.
#[derive(Clone)]
pub struct DialogueController {
    registry: AgentRegistry,
    store: Arc<RwLock<ConversationStore>>,
    transport: Arc<dyn AgentTransport>,
}

impl DialogueController {
    pub fn new(registry: AgentRegistry, transport: Arc<dyn AgentTransport>) -> Self {
        let store = ConversationStore::new(registry.clone());
        Self {
            registry,
            store: Arc::new(RwLock::new(store)),
            transport,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.store.read().await.subscribe()
    }

    pub async fn active(&self) -> AgentKey {
        self.store.read().await.active()
    }

    pub async fn activate(&self, key: AgentKey) {
        self.store.write().await.activate(key);
    }

    pub async fn is_loading(&self, key: AgentKey) -> bool {
        self.store.read().await.is_loading(key)
    }

    pub async fn snapshot(&self, key: AgentKey) -> ConversationSnapshot {
        self.store.read().await.snapshot(key)
    }

    pub async fn set_feedback(&self, key: AgentKey, id: MessageId, value: Feedback) -> bool {
        self.store.write().await.set_feedback(key, id, value)
    }

    /// Close the widget: every conversation is cleared. In-flight round-trips still settle.
    pub async fn close(&self) {
        log::info!("widget closed, clearing conversations");
        self.store.write().await.reset_all();
    }

    /// Submit `text` to `key` and wait for the round-trip to settle.
    /// Returns None when the submission is rejected (blank text or already sending).
    pub async fn submit(&self, key: AgentKey, text: &str) -> Option<RoundTripOutcome> {
        let pending = self.begin(key, text).await?;
        Some(self.complete(pending).await)
    }

    /// Idle -> Sending: append the user message, clear suggestions, raise loading.
    pub async fn begin(&self, key: AgentKey, text: &str) -> Option<PendingRoundTrip> {
        let text = text.trim();
        if text.is_empty() {
            log::debug!("dialogue {}: blank submission ignored", key);
            return None;
        }
        let mut store = self.store.write().await;
        if store.is_loading(key) {
            log::debug!("dialogue {}: submission rejected, round-trip in flight", key);
            return None;
        }
        let first_exchange = !store
            .messages(key)
            .iter()
            .any(|m| m.sender == Sender::User);
        store.append_user(key, text)?;
        let seq = store.start_sending(key)?;
        log::debug!("dialogue {}: round-trip {} started", key, seq);
        Some(PendingRoundTrip {
            key,
            seq,
            request: AgentRequest {
                message: text.to_string(),
                agent_id: self.registry.profile(key).remote_id.clone(),
            },
            first_exchange,
            store: Some(self.store.clone()),
        })
    }

    /// Run the transport call for an accepted submission and settle it.
    pub async fn complete(&self, mut pending: PendingRoundTrip) -> RoundTripOutcome {
        let result = self.transport.send(&pending.request).await;
        let mut store = self.store.write().await;
        let outcome = self.settle(&mut store, &pending, result);
        store.finish_sending(pending.key, pending.seq);
        pending.store = None;
        outcome
    }

    fn settle(
        &self,
        store: &mut ConversationStore,
        pending: &PendingRoundTrip,
        result: Result<AgentEnvelope, TransportError>,
    ) -> RoundTripOutcome {
        let key = pending.key;
        let payload = match result {
            Ok(envelope) => envelope.into_payload(),
            Err(e) => {
                log::warn!("dialogue {}: transport failed: {}", key, e);
                store.append_reply(key, pending.seq, CONNECTIVITY_APOLOGY, Vec::new());
                return RoundTripOutcome::Failed(FailureKind::Transport);
            }
        };
        let Some(payload) = payload else {
            log::warn!("dialogue {}: backend reported failure", key);
            store.append_reply(key, pending.seq, BACKEND_APOLOGY, Vec::new());
            return RoundTripOutcome::Failed(FailureKind::Backend);
        };
        let reply = normalize(&payload);
        let followups = if reply.followups.is_empty() && pending.first_exchange {
            self.registry.profile(key).initial_suggestions.clone()
        } else {
            reply.followups.clone()
        };
        store.append_reply(key, pending.seq, &reply.text, followups);
        log::debug!("dialogue {}: round-trip {} settled", key, pending.seq);
        RoundTripOutcome::Settled(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::FALLBACK_REPLY;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Answers every request with the same envelope (or error) and records requests.
    struct Scripted {
        reply: fn() -> Result<AgentEnvelope, TransportError>,
        seen: Mutex<Vec<AgentRequest>>,
    }

    impl Scripted {
        fn new(reply: fn() -> Result<AgentEnvelope, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentTransport for Scripted {
        async fn send(&self, request: &AgentRequest) -> Result<AgentEnvelope, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            (self.reply)()
        }
    }

    fn ok(payload: Value) -> Result<AgentEnvelope, TransportError> {
        Ok(AgentEnvelope::from_value(json!({ "success": true, "response": payload })))
    }

    fn controller(transport: Arc<dyn AgentTransport>) -> DialogueController {
        DialogueController::new(AgentRegistry::builtin(), transport)
    }

    #[tokio::test]
    async fn successful_round_trip_appends_normalized_reply() {
        let transport = Scripted::new(|| {
            ok(json!({ "response": " Amadeo is a platform. ", "suggested_followups": ["Pricing?"] }))
        });
        let ctl = controller(transport.clone());
        ctl.activate(AgentKey::Support).await;

        let outcome = ctl.submit(AgentKey::Support, " What is Amadeo? ").await;
        assert!(matches!(outcome, Some(RoundTripOutcome::Settled(_))));

        let snap = ctl.snapshot(AgentKey::Support).await;
        assert!(!snap.loading);
        assert_eq!(snap.messages.len(), 3);
        assert_eq!(snap.messages[1].text, "What is Amadeo?");
        assert_eq!(snap.messages[2].text, "Amadeo is a platform.");
        assert_eq!(snap.messages[2].sender, Sender::Agent);
        assert_eq!(snap.pending_suggestions, vec!["Pricing?".to_string()]);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "What is Amadeo?");
        assert_eq!(seen[0].agent_id, "support-agent");
    }

    #[tokio::test]
    async fn blank_submission_is_ignored() {
        let transport = Scripted::new(|| ok(json!("unused")));
        let ctl = controller(transport.clone());
        ctl.activate(AgentKey::Support).await;
        assert_eq!(ctl.submit(AgentKey::Support, "   ").await, None);
        assert_eq!(ctl.snapshot(AgentKey::Support).await.messages.len(), 1);
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_submission_rejected_while_sending() {
        let ctl = controller(Scripted::new(|| ok(json!("done"))));
        ctl.activate(AgentKey::Sales).await;
        let pending = ctl.begin(AgentKey::Sales, "first").await.unwrap();
        assert!(ctl.is_loading(AgentKey::Sales).await);
        assert!(ctl.begin(AgentKey::Sales, "second").await.is_none());
        assert!(ctl.snapshot(AgentKey::Sales).await.pending_suggestions.is_empty());

        ctl.complete(pending).await;
        assert!(!ctl.is_loading(AgentKey::Sales).await);
        let texts: Vec<String> = ctl
            .snapshot(AgentKey::Sales)
            .await
            .messages
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts[1..], ["first".to_string(), "done".to_string()]);
    }

    #[tokio::test]
    async fn network_error_appends_connectivity_apology() {
        let ctl = controller(Scripted::new(|| {
            Err(TransportError::Status("503 Service Unavailable".to_string()))
        }));
        ctl.activate(AgentKey::Support).await;
        let outcome = ctl.submit(AgentKey::Support, "hello").await;
        assert_eq!(outcome, Some(RoundTripOutcome::Failed(FailureKind::Transport)));

        let snap = ctl.snapshot(AgentKey::Support).await;
        assert!(!snap.loading);
        let agent_replies: Vec<&str> = snap.messages[2..].iter().map(|m| m.text.as_str()).collect();
        assert_eq!(agent_replies, vec![CONNECTIVITY_APOLOGY]);
        assert!(snap.pending_suggestions.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_counts_as_transport_failure() {
        let ctl = controller(Scripted::new(|| {
            Err(serde_json::from_str::<Value>("<html>").unwrap_err().into())
        }));
        ctl.activate(AgentKey::Support).await;
        let outcome = ctl.submit(AgentKey::Support, "hello").await;
        assert_eq!(outcome, Some(RoundTripOutcome::Failed(FailureKind::Transport)));
    }

    #[tokio::test]
    async fn backend_failure_appends_distinct_apology() {
        let ctl = controller(Scripted::new(|| {
            Ok(AgentEnvelope::from_value(json!({ "success": false, "error": "boom" })))
        }));
        ctl.activate(AgentKey::Sales).await;
        let outcome = ctl.submit(AgentKey::Sales, "pricing").await;
        assert_eq!(outcome, Some(RoundTripOutcome::Failed(FailureKind::Backend)));
        let snap = ctl.snapshot(AgentKey::Sales).await;
        assert_eq!(snap.messages.last().unwrap().text, BACKEND_APOLOGY);
        assert_ne!(BACKEND_APOLOGY, CONNECTIVITY_APOLOGY);
        assert!(!snap.loading);
    }

    #[tokio::test]
    async fn unrecognized_payload_gets_fallback_text() {
        let ctl = controller(Scripted::new(|| ok(json!({ "data": [1, 2, 3] }))));
        ctl.activate(AgentKey::Support).await;
        let outcome = ctl.submit(AgentKey::Support, "hello").await.unwrap();
        let RoundTripOutcome::Settled(reply) = outcome else {
            panic!("expected settled");
        };
        assert_eq!(reply.text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn initial_suggestions_only_back_fill_the_first_reply() {
        let ctl = controller(Scripted::new(|| ok(json!("plain answer"))));
        ctl.activate(AgentKey::Sales).await;
        let initial = ctl.registry().profile(AgentKey::Sales).initial_suggestions.clone();

        ctl.submit(AgentKey::Sales, "hi").await;
        assert_eq!(ctl.snapshot(AgentKey::Sales).await.pending_suggestions, initial);

        ctl.submit(AgentKey::Sales, "and then?").await;
        assert!(ctl.snapshot(AgentKey::Sales).await.pending_suggestions.is_empty());
    }

    /// Holds sales requests until released; answers support immediately.
    struct Gated {
        release_sales: Arc<Notify>,
    }

    #[async_trait]
    impl AgentTransport for Gated {
        async fn send(&self, request: &AgentRequest) -> Result<AgentEnvelope, TransportError> {
            if request.agent_id == "sales-agent" {
                self.release_sales.notified().await;
                return ok(json!({ "sales_guidance": { "main_response": "Plans start at $10." } }));
            }
            ok(json!({ "response": "Amadeo is a platform." }))
        }
    }

    #[tokio::test]
    async fn concurrent_agents_write_to_their_own_logs() {
        let release_sales = Arc::new(Notify::new());
        let ctl = controller(Arc::new(Gated {
            release_sales: release_sales.clone(),
        }));
        ctl.activate(AgentKey::Sales).await;
        let sales = ctl.begin(AgentKey::Sales, "How much?").await.unwrap();
        let sales_ctl = ctl.clone();
        let sales_task = tokio::spawn(async move { sales_ctl.complete(sales).await });

        ctl.activate(AgentKey::Support).await;
        let outcome = ctl.submit(AgentKey::Support, "What is Amadeo?").await;
        assert!(matches!(outcome, Some(RoundTripOutcome::Settled(_))));

        let support = ctl.snapshot(AgentKey::Support).await;
        assert_eq!(support.messages.len(), 3);
        assert_eq!(support.messages[2].text, "Amadeo is a platform.");
        let sales_snap = ctl.snapshot(AgentKey::Sales).await;
        assert_eq!(sales_snap.messages.len(), 2);
        assert!(sales_snap.loading);

        release_sales.notify_one();
        let sales_outcome = sales_task.await.unwrap();
        assert!(matches!(sales_outcome, RoundTripOutcome::Settled(_)));
        let sales_snap = ctl.snapshot(AgentKey::Sales).await;
        assert_eq!(sales_snap.messages.len(), 3);
        assert_eq!(sales_snap.messages[2].text, "Plans start at $10.");
        assert!(!sales_snap.loading);
        assert_eq!(ctl.active().await, AgentKey::Support);
        assert_eq!(ctl.snapshot(AgentKey::Support).await.messages.len(), 3);
    }

    #[tokio::test]
    async fn reply_after_close_still_lands_in_its_conversation() {
        let ctl = controller(Scripted::new(|| ok(json!("late reply"))));
        ctl.activate(AgentKey::Support).await;
        let pending = ctl.begin(AgentKey::Support, "hello").await.unwrap();
        ctl.close().await;
        assert!(!ctl.is_loading(AgentKey::Support).await);

        ctl.complete(pending).await;
        let snap = ctl.snapshot(AgentKey::Support).await;
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.messages[0].text, "late reply");
        assert!(!snap.loading);
    }

    /// Holds every request until released, then answers with a follow-up.
    struct Held {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl AgentTransport for Held {
        async fn send(&self, _request: &AgentRequest) -> Result<AgentEnvelope, TransportError> {
            self.release.notified().await;
            ok(json!({ "response": "late", "suggested_followups": ["stale?"] }))
        }
    }

    #[tokio::test]
    async fn reply_after_close_leaves_newer_round_trip_suggestions_empty() {
        let release = Arc::new(Notify::new());
        let ctl = controller(Arc::new(Held {
            release: release.clone(),
        }));
        ctl.activate(AgentKey::Support).await;
        let old = ctl.begin(AgentKey::Support, "old").await.unwrap();
        let old_ctl = ctl.clone();
        let old_task = tokio::spawn(async move { old_ctl.complete(old).await });

        ctl.close().await;
        ctl.activate(AgentKey::Support).await;
        let new = ctl.begin(AgentKey::Support, "new").await.unwrap();

        release.notify_one();
        old_task.await.unwrap();
        let snap = ctl.snapshot(AgentKey::Support).await;
        assert!(snap.loading);
        assert_eq!(snap.messages.last().unwrap().text, "late");
        assert!(snap.pending_suggestions.is_empty());

        let new_ctl = ctl.clone();
        let new_task = tokio::spawn(async move { new_ctl.complete(new).await });
        release.notify_one();
        new_task.await.unwrap();
        let snap = ctl.snapshot(AgentKey::Support).await;
        assert!(!snap.loading);
        assert_eq!(snap.pending_suggestions, vec!["stale?".to_string()]);
    }

    /// Never answers.
    struct Silent;

    #[async_trait]
    impl AgentTransport for Silent {
        async fn send(&self, _request: &AgentRequest) -> Result<AgentEnvelope, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn aborted_round_trip_returns_conversation_to_idle() {
        let ctl = controller(Arc::new(Silent));
        ctl.activate(AgentKey::Support).await;
        let pending = ctl.begin(AgentKey::Support, "hello").await.unwrap();
        let task_ctl = ctl.clone();
        let task = tokio::spawn(async move { task_ctl.complete(pending).await });
        tokio::task::yield_now().await;
        assert!(ctl.is_loading(AgentKey::Support).await);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!ctl.is_loading(AgentKey::Support).await);
        assert!(ctl.begin(AgentKey::Support, "retry").await.is_some());
    }

    #[tokio::test]
    async fn dropped_pending_round_trip_returns_conversation_to_idle() {
        let ctl = controller(Arc::new(Silent));
        ctl.activate(AgentKey::Sales).await;
        let pending = ctl.begin(AgentKey::Sales, "hello").await.unwrap();
        assert_eq!(pending.agent(), AgentKey::Sales);
        drop(pending);
        assert!(!ctl.is_loading(AgentKey::Sales).await);
        let snap = ctl.snapshot(AgentKey::Sales).await;
        assert_eq!(snap.messages.len(), 2);
    }

    #[tokio::test]
    async fn loading_events_bracket_the_round_trip() {
        let ctl = controller(Scripted::new(|| ok(json!("hi"))));
        ctl.activate(AgentKey::Support).await;
        let mut rx = ctl.subscribe().await;
        ctl.submit(AgentKey::Support, "hello").await;

        let mut loading = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WidgetEvent::LoadingChanged(AgentKey::Support, flag) = event {
                loading.push(flag);
            }
        }
        assert_eq!(loading, vec![true, false]);
    }
}

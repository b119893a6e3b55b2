//! Conversation snapshot synchronization.
//!
//! Keeps the snapshot of one bound conversation fresh by polling. Binding a
//! different conversation stops the old poller before the new one starts,
//! and every request carries a sequence number: a response is applied only
//! if it belongs to the most recently issued request, so neither a slow
//! response for the same conversation nor any response for a previously
//! bound one can overwrite newer state.

use crate::config::SyncConfig;
use crate::error::ConvoError;
use crate::locator::LocatorState;
use crate::model::ConversationSnapshot;
use lily_core::{ConversationId, Poller, ScopedTask};
use lily_session::{RequestOptions, SessionManager};
use reqwest::Method;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Published synchronizer state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub conversation_id: Option<ConversationId>,
    /// Last successfully fetched snapshot of the bound conversation. Kept
    /// while a refresh is in flight or after one fails.
    pub snapshot: ConversationSnapshot,
    pub is_loading: bool,
    /// Message of the last failed refresh, cleared by the next one.
    pub error: Option<String>,
}

/// Polls the bound conversation's documents and alerts.
#[derive(Clone)]
pub struct ConversationSync {
    inner: Arc<Inner>,
}

struct Inner {
    session: SessionManager,
    config: SyncConfig,
    state: watch::Sender<SyncState>,
    // Only read or bumped while the state lock is held.
    request_seq: AtomicU64,
    polling: Mutex<Polling>,
}

#[derive(Default)]
struct Polling {
    active: Option<Poller>,
    // Token of the `follow` task driving this sync, if any. Pollers started
    // under it stop as soon as that task is dropped.
    scope: Option<CancellationToken>,
}

impl ConversationSync {
    #[must_use]
    pub fn new(session: SessionManager, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            inner: Arc::new(Inner {
                session,
                config,
                state,
                request_seq: AtomicU64::new(0),
                polling: Mutex::new(Polling::default()),
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.inner.state.borrow().snapshot.clone()
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.state.borrow().conversation_id.clone()
    }

    /// Binds a conversation, or unbinds with `None`.
    ///
    /// Rebinding the current id does nothing. Otherwise the previous poller
    /// is stopped, responses still in flight are invalidated, the snapshot is
    /// cleared and, if an id is bound, polling starts with an immediate fetch.
    pub fn bind(&self, conversation_id: Option<ConversationId>) {
        let mut polling = self.polling();

        let changed = self.inner.state.send_if_modified(|state| {
            if state.conversation_id == conversation_id {
                return false;
            }
            self.inner.request_seq.fetch_add(1, Ordering::SeqCst);
            *state = SyncState {
                conversation_id: conversation_id.clone(),
                ..SyncState::default()
            };
            true
        });
        if !changed {
            return;
        }

        if let Some(previous) = polling.active.take() {
            previous.cancel();
        }
        match conversation_id {
            Some(id) => {
                info!(conversation_id = %id, "following conversation");
                polling.active = Some(self.start_polling(polling.scope.as_ref()));
            }
            None => debug!("conversation unbound"),
        }
    }

    /// Fetches the bound conversation's snapshot and replaces the local one.
    ///
    /// Does nothing when no conversation is bound. A failure is recorded in
    /// `error` and the previous snapshot stays. A response that arrives after
    /// a newer request was issued, or after the conversation was rebound, is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if this refresh was the latest and its request
    /// failed, returned a non-success status, or carried an undecodable body.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> lily_core::Result<(), ConvoError> {
        let mut issued = None;
        self.inner.state.send_if_modified(|state| {
            let Some(id) = state.conversation_id.clone() else {
                return false;
            };
            let seq = self.inner.request_seq.fetch_add(1, Ordering::SeqCst) + 1;
            issued = Some((id, seq));
            state.is_loading = true;
            state.error = None;
            true
        });
        let Some((id, seq)) = issued else {
            return Ok(());
        };

        let result = self.request_snapshot(&id).await;

        let mut applied = false;
        let mut fetched = result.as_ref().ok().cloned();
        self.inner.state.send_if_modified(|state| {
            if self.inner.request_seq.load(Ordering::SeqCst) != seq {
                return false;
            }
            applied = true;
            state.is_loading = false;
            match (fetched.take(), &result) {
                (Some(snapshot), _) => state.snapshot = snapshot,
                (None, Err(e)) => state.error = Some(e.to_string()),
                (None, Ok(_)) => {}
            }
            true
        });

        if !applied {
            debug!(conversation_id = %id, seq, "discarding superseded snapshot");
            return Ok(());
        }
        result?;
        Ok(())
    }

    async fn request_snapshot(&self, id: &ConversationId) -> Result<ConversationSnapshot, ConvoError> {
        let url = self.inner.session.endpoint(&format!("/convo/{id}"));
        let response = self
            .inner
            .session
            .fetch_with_auth(Method::GET, &url, RequestOptions::default())
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConvoError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ConvoError::MalformedResponse {
                reason: e.to_string(),
            })
    }

    /// Keeps the bound conversation in step with a locator.
    ///
    /// The locator's conversation is bound only while the session is logged
    /// in. Logging out unbinds, and logging back in binds the locator's
    /// retained conversation again. Dropping the returned handle unbinds and
    /// stops the poller immediately.
    #[must_use]
    pub fn follow(&self, mut conversations: watch::Receiver<LocatorState>) -> ScopedTask {
        let sync = self.clone();
        let mut session = self.inner.session.subscribe();

        ScopedTask::spawn("conversation-sync", move |scope| {
            sync.polling().scope = Some(scope);
            async move {
                let _unbind = UnbindOnDrop(sync.clone());
                loop {
                    let logged_in = session.borrow_and_update().is_logged_in;
                    let id = conversations.borrow_and_update().conversation_id.clone();
                    sync.bind(id.filter(|_| logged_in));

                    let alive = tokio::select! {
                        changed = session.changed() => changed.is_ok(),
                        changed = conversations.changed() => changed.is_ok(),
                    };
                    if !alive {
                        break;
                    }
                }
            }
        })
    }

    fn polling(&self) -> MutexGuard<'_, Polling> {
        self.inner
            .polling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn start_polling(&self, scope: Option<&CancellationToken>) -> Poller {
        // Weak, so the poller stored in `inner` does not keep `inner` alive.
        let inner = Arc::downgrade(&self.inner);
        let tick = move || {
            let inner: Weak<Inner> = inner.clone();
            async move {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let sync = ConversationSync { inner };
                if let Err(e) = sync.refresh().await {
                    warn!(error = %e, "failed to refresh conversation");
                }
            }
        };
        let interval = self.inner.config.poll_interval();
        match scope.filter(|scope| !scope.is_cancelled()) {
            Some(scope) => Poller::spawn_child("conversation-snapshot", interval, scope, tick),
            None => Poller::spawn("conversation-snapshot", interval, tick),
        }
    }
}

struct UnbindOnDrop(ConversationSync);

impl Drop for UnbindOnDrop {
    fn drop(&mut self) {
        {
            let mut polling = self.0.polling();
            // A newer `follow` may have installed its own scope already.
            if polling.scope.as_ref().is_some_and(CancellationToken::is_cancelled) {
                polling.scope = None;
            }
        }
        self.0.bind(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::ConversationLocator;
    use lily_session::{MemoryCredentialStore, SessionConfig};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(server: &MockServer) -> SessionManager {
        SessionManager::new(
            SessionConfig::new(server.uri()),
            Arc::new(MemoryCredentialStore::with_entry("access_token", "abc")),
        )
        .expect("session manager")
    }

    fn sync_with_interval(server: &MockServer, interval: Duration) -> ConversationSync {
        ConversationSync::new(
            session(server),
            SyncConfig::default().with_poll_interval(interval),
        )
    }

    fn document_snapshot(document_id: &str) -> serde_json::Value {
        json!({
            "documents": [{"document_id": document_id, "overview": "", "content": ""}],
            "alerts": [],
            "transcripts": []
        })
    }

    async fn requests_to(server: &MockServer, target: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == target)
            .count()
    }

    async fn wait_until(sync: &ConversationSync, predicate: impl FnMut(&SyncState) -> bool) {
        let mut rx = sync.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
            .await
            .expect("state reached in time")
            .expect("sync alive");
    }

    fn first_document(state: &SyncState) -> Option<&str> {
        state
            .snapshot
            .documents
            .first()
            .map(|d| d.document_id.as_str())
    }

    #[tokio::test]
    async fn refresh_without_conversation_is_a_no_op() {
        let server = MockServer::start().await;
        let sync = sync_with_interval(&server, Duration::from_secs(60));

        sync.refresh().await.expect("no-op");

        assert!(server.received_requests().await.unwrap_or_default().is_empty());
        assert!(!sync.state().is_loading);
    }

    #[tokio::test]
    async fn missing_fields_become_empty_collections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_secs(60));
        sync.bind(Some(ConversationId::from("c1")));
        sync.refresh().await.expect("refresh");

        let state = sync.state();
        assert!(state.snapshot.documents.is_empty());
        assert!(state.snapshot.alerts.is_empty());
        assert!(state.error.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn selected_document_alerts_split_into_title_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{
                    "document_id": "d1",
                    "convo_id": "c1",
                    "created_at": "2024-03-05T10:11:12.345Z",
                    "overview": "Visit summary",
                    "content": "..."
                }],
                "alerts": [{
                    "alert_id": "a1",
                    "doc_id": "d1",
                    "timestamp": "2024-03-05T10:11:13.000Z",
                    "message": "High BP. Seek care."
                }],
                "transcripts": []
            })))
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_secs(60));
        sync.bind(Some(ConversationId::from("c1")));
        wait_until(&sync, |s| !s.snapshot.documents.is_empty()).await;

        let snapshot = sync.snapshot();
        let selection = snapshot.select(0).expect("document");
        assert_eq!(selection.alerts.len(), 1);
        assert_eq!(selection.alerts[0].title(), "High BP");
        assert_eq!(selection.alerts[0].body(), "Seek care.");
    }

    #[tokio::test]
    async fn failure_keeps_last_snapshot_and_records_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_secs(60));
        sync.bind(Some(ConversationId::from("c1")));
        wait_until(&sync, |s| first_document(s) == Some("d1")).await;

        let err = sync.refresh().await.expect_err("server error");
        assert!(err.to_string().contains("500"));

        let state = sync.state();
        assert_eq!(first_document(&state), Some("d1"));
        assert!(state.error.expect("error recorded").contains("500"));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn latest_issued_refresh_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("initial")))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_secs(60));
        sync.bind(Some(ConversationId::from("c1")));
        wait_until(&sync, |s| first_document(s) == Some("initial")).await;

        // Issued first, answered last.
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(document_snapshot("older"))
                    .set_delay(Duration::from_millis(300)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("newer")))
            .mount(&server)
            .await;

        let slow = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        sync.refresh().await.expect("fast refresh");
        assert_eq!(first_document(&sync.state()), Some("newer"));
        assert!(!sync.state().is_loading);

        slow.await.expect("join").expect("superseded refresh");
        let state = sync.state();
        assert_eq!(first_document(&state), Some("newer"));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn switching_conversation_stops_the_old_poller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/c2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d2")))
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_millis(25));
        sync.bind(Some(ConversationId::from("c1")));
        wait_until(&sync, |s| first_document(s) == Some("d1")).await;

        sync.bind(Some(ConversationId::from("c2")));
        let switched = sync.state();
        assert_eq!(switched.conversation_id, Some(ConversationId::from("c2")));
        assert!(switched.snapshot.is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let c1_requests = requests_to(&server, "/convo/c1").await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(requests_to(&server, "/convo/c1").await, c1_requests);
        assert!(requests_to(&server, "/convo/c2").await >= 2);
        let state = sync.state();
        assert_eq!(state.snapshot.documents.len(), 1);
        assert_eq!(first_document(&state), Some("d2"));
    }

    #[tokio::test]
    async fn late_response_for_previous_conversation_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(document_snapshot("d1"))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/c2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d2")))
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_secs(60));
        sync.bind(Some(ConversationId::from("c1")));
        let manual = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        sync.bind(Some(ConversationId::from("c2")));

        manual.await.expect("join").expect("superseded refresh");
        wait_until(&sync, |s| first_document(s) == Some("d2")).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(first_document(&sync.state()), Some("d2"));
    }

    #[tokio::test]
    async fn rebinding_same_conversation_is_a_no_op() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d1")))
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_secs(60));
        sync.bind(Some(ConversationId::from("c1")));
        wait_until(&sync, |s| first_document(s) == Some("d1")).await;

        sync.bind(Some(ConversationId::from("c1")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first_document(&sync.state()), Some("d1"));
        assert_eq!(requests_to(&server, "/convo/c1").await, 1);
    }

    #[tokio::test]
    async fn unbinding_clears_state_and_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d1")))
            .mount(&server)
            .await;

        let sync = sync_with_interval(&server, Duration::from_millis(25));
        sync.bind(Some(ConversationId::from("c1")));
        wait_until(&sync, |s| first_document(s) == Some("d1")).await;

        sync.bind(None);
        assert_eq!(sync.state(), SyncState::default());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let seen = requests_to(&server, "/convo/c1").await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(requests_to(&server, "/convo/c1").await, seen);
    }

    #[tokio::test]
    async fn follows_the_locator() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/session"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/latest/00000000-0000-0000-0000-000000000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"convo_id": "c1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d1")))
            .mount(&server)
            .await;

        let session = session(&server);
        session.restore_session().await;
        let config = SyncConfig::default().with_poll_interval(Duration::from_millis(25));
        let locator = ConversationLocator::new(session.clone(), config.clone());
        let sync = ConversationSync::new(session, config);

        let _locate = locator.follow_session();
        let follow = sync.follow(locator.subscribe());
        wait_until(&sync, |s| first_document(s) == Some("d1")).await;
        assert_eq!(sync.conversation_id(), Some(ConversationId::from("c1")));

        drop(follow);
        assert!(sync.polling().active.as_ref().is_some_and(Poller::is_cancelled));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.conversation_id(), None);
    }

    #[tokio::test]
    async fn stops_polling_after_logout_and_resumes_on_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_token": "abc"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/auth/session"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/latest/00000000-0000-0000-0000-000000000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"convo_id": "c1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/convo/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_snapshot("d1")))
            .mount(&server)
            .await;

        let session = SessionManager::new(
            SessionConfig::new(server.uri()),
            Arc::new(MemoryCredentialStore::new()),
        )
        .expect("session manager");
        let config = SyncConfig::default().with_poll_interval(Duration::from_millis(25));
        let locator = ConversationLocator::new(session.clone(), config.clone());
        let sync = ConversationSync::new(session.clone(), config);
        let _locate = locator.follow_session();
        let _follow = sync.follow(locator.subscribe());

        session.sign_in("carol@demo.com").await;
        wait_until(&sync, |s| first_document(s) == Some("d1")).await;

        session.sign_out().await;
        wait_until(&sync, |s| s.conversation_id.is_none()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_logout = requests_to(&server, "/convo/c1").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(requests_to(&server, "/convo/c1").await, after_logout);
        assert_eq!(sync.state(), SyncState::default());
        assert_eq!(locator.conversation_id(), Some(ConversationId::from("c1")));

        session.sign_in("carol@demo.com").await;
        wait_until(&sync, |s| first_document(s) == Some("d1")).await;
        assert_eq!(sync.conversation_id(), Some(ConversationId::from("c1")));
    }
}

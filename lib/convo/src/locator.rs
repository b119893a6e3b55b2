//! Conversation discovery.
//!
//! The conversation the client should show is created asynchronously on the
//! server by an external device, and the server has no way to tell us about
//! it. The locator asks for the latest conversation of a fixed identity,
//! once on login and then on every poll interval, for as long as the session
//! is logged in.

use crate::config::SyncConfig;
use crate::error::ConvoError;
use lily_core::{ConversationId, Poller, ScopedTask};
use lily_session::{RequestOptions, SessionManager};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What the locator currently knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatorState {
    /// The active conversation. Kept across failed polls and across logout.
    pub conversation_id: Option<ConversationId>,
    /// True until the first fetch settles, and again while one is in flight.
    pub is_loading: bool,
}

impl Default for LocatorState {
    fn default() -> Self {
        Self {
            conversation_id: None,
            is_loading: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LatestConversation {
    #[serde(default)]
    convo_id: Option<ConversationId>,
}

/// Finds the active conversation for the configured identity.
#[derive(Clone)]
pub struct ConversationLocator {
    inner: Arc<Inner>,
}

struct Inner {
    session: SessionManager,
    config: SyncConfig,
    state: watch::Sender<LocatorState>,
    // Bumped on every logout; fetches started under an older epoch are
    // discarded when they resolve.
    epoch: AtomicU64,
    poller: Mutex<Option<Poller>>,
}

impl ConversationLocator {
    #[must_use]
    pub fn new(session: SessionManager, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(LocatorState::default());
        Self {
            inner: Arc::new(Inner {
                session,
                config,
                state,
                epoch: AtomicU64::new(0),
                poller: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LocatorState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> LocatorState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.state.borrow().conversation_id.clone()
    }

    /// Asks the server for the latest conversation and records it.
    ///
    /// Returns the id the server reported. `Ok(None)` means the server sent
    /// no usable id, or the session ended while the request was in flight and
    /// the answer was dropped. On error the previous id stays in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server answers with a
    /// non-success status (404 meaning no conversation exists yet), or the
    /// body cannot be decoded.
    #[instrument(skip(self), fields(identity = %self.inner.config.identity))]
    pub async fn fetch_latest_conversation(
        &self,
    ) -> lily_core::Result<Option<ConversationId>, ConvoError> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.inner
            .state
            .send_if_modified(|state| !std::mem::replace(&mut state.is_loading, true));

        let result = self.request_latest().await;

        let mut applied = false;
        self.inner.state.send_modify(|state| {
            state.is_loading = false;
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            applied = true;
            if let Ok(Some(id)) = &result {
                if state.conversation_id.as_ref() != Some(id) {
                    info!(conversation_id = %id, "active conversation changed");
                    state.conversation_id = Some(id.clone());
                }
            }
        });

        if !applied {
            debug!("session ended during fetch, discarding result");
            return Ok(None);
        }
        Ok(result?)
    }

    async fn request_latest(&self) -> Result<Option<ConversationId>, ConvoError> {
        let identity = &self.inner.config.identity;
        let url = self
            .inner
            .session
            .endpoint(&format!("/convo/latest/{identity}"));

        let response = self
            .inner
            .session
            .fetch_with_auth(Method::GET, &url, RequestOptions::default())
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ConvoError::NoConversation {
                identity: identity.clone(),
            });
        }
        if !status.is_success() {
            return Err(ConvoError::Status {
                status: status.as_u16(),
            });
        }

        let latest: LatestConversation =
            response
                .json()
                .await
                .map_err(|e| ConvoError::MalformedResponse {
                    reason: e.to_string(),
                })?;
        Ok(latest.convo_id.filter(|id| !id.is_empty()))
    }

    /// Polls for the latest conversation while the session is logged in.
    ///
    /// Logging in starts a poller that fetches immediately and then on every
    /// interval; logging out stops it and discards any fetch still in flight.
    /// The poller is scoped to the returned handle, so dropping the handle
    /// stops it at once.
    #[must_use]
    pub fn follow_session(&self) -> ScopedTask {
        let locator = self.clone();
        let mut session = self.inner.session.subscribe();

        ScopedTask::spawn("conversation-locator", move |scope| async move {
            loop {
                let logged_in = session.borrow_and_update().is_logged_in;
                if logged_in {
                    locator.activate(&scope);
                } else if locator.is_polling() {
                    debug!("session ended, stopping conversation poll");
                    locator.deactivate();
                }

                if session.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn poller_slot(&self) -> MutexGuard<'_, Option<Poller>> {
        self.inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_polling(&self) -> bool {
        self.poller_slot()
            .as_ref()
            .is_some_and(|poller| !poller.is_cancelled())
    }

    fn activate(&self, scope: &CancellationToken) {
        let mut slot = self.poller_slot();
        if slot.as_ref().is_some_and(|poller| !poller.is_cancelled()) {
            return;
        }
        debug!("session active, polling for conversation");
        *slot = Some(self.start_polling(scope));
    }

    fn start_polling(&self, scope: &CancellationToken) -> Poller {
        // Weak, so the poller stored in `inner` does not keep `inner` alive.
        let inner = Arc::downgrade(&self.inner);
        Poller::spawn_child(
            "latest-conversation",
            self.inner.config.poll_interval(),
            scope,
            move || {
                let inner: Weak<Inner> = inner.clone();
                async move {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    let locator = ConversationLocator { inner };
                    if let Err(e) = locator.fetch_latest_conversation().await {
                        warn!(error = %e, "failed to fetch latest conversation");
                    }
                }
            },
        )
    }

    fn deactivate(&self) {
        if let Some(active) = self.poller_slot().take() {
            active.cancel();
        }
        // Bumped under the state lock so a fetch cannot apply between the
        // bump and its own epoch check.
        self.inner.state.send_if_modified(|state| {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut state.is_loading, false)
        });
    }
}

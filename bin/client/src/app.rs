//! Client wiring.
//!
//! Builds the session, locator and synchronizer from configuration, starts
//! the background tasks, and reports what the client sees until shutdown.

use crate::config::ClientConfig;
use lily_convo::{ConversationLocator, ConversationSync, SyncState};
use lily_core::ScopedTask;
use lily_session::{FileCredentialStore, SessionError, SessionManager, SessionState};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// A running client. Dropping it stops all polling.
pub struct Client {
    session: SessionManager,
    locator: ConversationLocator,
    sync: ConversationSync,
    _locate: ScopedTask,
    _follow: ScopedTask,
}

impl Client {
    /// Restores (or establishes) the session and starts polling.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built. Session and poll
    /// failures are not errors: they are logged and show up in the published
    /// state.
    pub async fn start(config: ClientConfig) -> lily_core::Result<Self, SessionError> {
        let store = Arc::new(FileCredentialStore::new(&config.credential_path));
        let session = SessionManager::new(config.session, store)?;

        let restored = session.restore_session().await;
        info!(outcome = %restored, "session restoration finished");

        if !session.is_logged_in() {
            match &config.sign_in_email {
                Some(email) => {
                    let outcome = session.sign_in(email).await;
                    if outcome.is_signed_in() {
                        info!(outcome = %outcome, "sign in finished");
                    } else {
                        warn!(outcome = %outcome, "sign in failed; waiting");
                    }
                }
                None => warn!("not signed in and SIGN_IN_EMAIL is not set; waiting"),
            }
        }

        let locator = ConversationLocator::new(session.clone(), config.sync.clone());
        let sync = ConversationSync::new(session.clone(), config.sync);
        let locate = locator.follow_session();
        let follow = sync.follow(locator.subscribe());

        Ok(Self {
            session,
            locator,
            sync,
            _locate: locate,
            _follow: follow,
        })
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    #[must_use]
    pub fn locator(&self) -> &ConversationLocator {
        &self.locator
    }

    #[must_use]
    pub fn sync(&self) -> &ConversationSync {
        &self.sync
    }
}

/// Starts a client and logs session and conversation changes until
/// `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the client cannot be started.
pub async fn run(
    config: ClientConfig,
    shutdown: impl Future<Output = ()>,
) -> lily_core::Result<(), SessionError> {
    let client = Client::start(config).await?;
    let mut session = client.session().subscribe();
    let mut sync = client.sync().subscribe();
    report_session(&session.borrow_and_update());

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutting down");
                break;
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                report_session(&session.borrow_and_update());
            }
            changed = sync.changed() => {
                if changed.is_err() {
                    break;
                }
                report_sync(&sync.borrow_and_update());
            }
        }
    }

    drop(client);
    Ok(())
}

fn report_session(state: &SessionState) {
    match &state.last_error {
        Some(error) => info!(phase = ?state.phase(), last_error = %error, "session"),
        None => info!(phase = ?state.phase(), "session"),
    }
}

fn report_sync(state: &SyncState) {
    if state.is_loading {
        return;
    }
    if let Some(error) = &state.error {
        warn!(error = %error, "conversation refresh failed");
        return;
    }
    let Some(conversation_id) = &state.conversation_id else {
        info!("no active conversation");
        return;
    };

    let snapshot = &state.snapshot;
    info!(
        conversation_id = %conversation_id,
        documents = snapshot.documents.len(),
        alerts = snapshot.alerts.len(),
        dangling_alerts = snapshot.dangling_alerts().count(),
        "conversation snapshot"
    );
    if let Some(selection) = snapshot.select(0) {
        for alert in &selection.alerts {
            info!(
                document_id = %selection.document.document_id,
                page = %selection,
                title = alert.title(),
                body = alert.body(),
                "alert"
            );
        }
    }
}

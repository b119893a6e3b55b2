//! The session manager.
//!
//! Owns the login state and the single stored token, and provides
//! [`SessionManager::fetch_with_auth`], the only channel through which the
//! rest of the client talks to the server.
//!
//! | operation | endpoint |
//! |-----------|----------|
//! | restore   | `GET {base}/auth/session` (bearer) |
//! | sign in   | `POST {base}/auth/session` |
//! | sign out  | `DELETE {base}/auth/session` (bearer) |

use crate::config::SessionConfig;
use crate::credential::CredentialStore;
use crate::error::SessionError;
use crate::state::{RestoreOutcome, SessionState, SignInOutcome};
use crate::token::SessionToken;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

const SESSION_PATH: &str = "/auth/session";
const SIGN_IN_PROVIDER: &str = "email";

/// Extra request parameters for [`SessionManager::fetch_with_auth`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Caller headers. An `Authorization` entry here is always replaced by
    /// the session's bearer credential.
    pub headers: HeaderMap,
    /// Optional JSON body.
    pub json: Option<serde_json::Value>,
}

impl RequestOptions {
    /// Options with a JSON body.
    #[must_use]
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            json: Some(body),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    provider: &'a str,
    oauth_code: &'a str,
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    #[serde(default)]
    session_token: Option<String>,
}

/// Session manager handle.
///
/// Cheap to clone; every clone shares the same state, token store and HTTP
/// connection pool. Hand clones to the components that need authenticated
/// requests instead of reaching for a global.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    config: SessionConfig,
    credentials: Arc<dyn CredentialStore>,
    state: watch::Sender<SessionState>,
}

/// Clears `is_loading` when dropped, so restoration cannot leave the flag
/// stuck even if the restoring future is abandoned half-way.
struct LoadingGuard<'a>(&'a watch::Sender<SessionState>);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| std::mem::replace(&mut state.is_loading, false));
    }
}

impl SessionManager {
    /// Creates a session manager. The initial state is loading and logged out.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: SessionConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, Report<SessionError>> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SessionError::ClientSetup {
                reason: e.to_string(),
            })?;

        let (state, _) = watch::channel(SessionState::default());

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                credentials,
                state,
            }),
        })
    }

    /// Returns the configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Joins `path` onto the service base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        self.inner.config.endpoint(path)
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Returns true while the server is believed to accept our token.
    ///
    /// Any awaited authenticated request can flip this to false.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.inner.state.borrow().is_logged_in
    }

    /// Restores the session persisted by a previous run.
    ///
    /// Probes the session endpoint with the stored token. Success marks the
    /// session logged in; anything else deletes the stored token and marks it
    /// logged out. `is_loading` is cleared on every path. Never fails: the
    /// returned outcome says what happened.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> RestoreOutcome {
        self.inner
            .state
            .send_if_modified(|state| !std::mem::replace(&mut state.is_loading, true));
        let _loading = LoadingGuard(&self.inner.state);

        let outcome = self.probe_session().await;
        if outcome.is_restored() {
            info!("session restored");
            self.inner.state.send_modify(|state| {
                state.is_logged_in = true;
                state.has_token = true;
                state.last_error = None;
            });
        } else {
            match &outcome {
                RestoreOutcome::NoToken => debug!("no stored session"),
                other => warn!(outcome = %other, "could not restore session"),
            }
            self.forget_token().await;
            self.inner.state.send_modify(|state| {
                state.is_logged_in = false;
                state.has_token = false;
            });
        }

        outcome
    }

    async fn probe_session(&self) -> RestoreOutcome {
        match self.read_token().await {
            Ok(Some(_)) => {}
            Ok(None) => return RestoreOutcome::NoToken,
            Err(e) => {
                return RestoreOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        let url = self.endpoint(SESSION_PATH);
        match self
            .fetch_with_auth(Method::GET, &url, RequestOptions::default())
            .await
        {
            Ok(response) if response.status().is_success() => RestoreOutcome::Restored,
            Ok(response) => RestoreOutcome::Rejected {
                status: response.status().as_u16(),
            },
            Err(e) => RestoreOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Signs in with an email identifier.
    ///
    /// On success the issued token is stored and the session becomes logged
    /// in. Failure never surfaces as an error: the login flag is left as it
    /// was, the failure is logged and written to `last_error`, and the
    /// returned outcome describes it.
    #[instrument(skip(self, identifier))]
    pub async fn sign_in(&self, identifier: &str) -> SignInOutcome {
        let outcome = self.request_session(identifier).await;
        match &outcome {
            SignInOutcome::SignedIn => {
                info!("signed in");
                self.inner.state.send_modify(|state| {
                    state.is_logged_in = true;
                    state.has_token = true;
                    state.last_error = None;
                });
            }
            failure => {
                warn!(outcome = %failure, "sign in did not complete");
                let message = failure.to_string();
                self.inner
                    .state
                    .send_modify(|state| state.last_error = Some(message));
            }
        }
        outcome
    }

    async fn request_session(&self, identifier: &str) -> SignInOutcome {
        let body = SignInRequest {
            provider: SIGN_IN_PROVIDER,
            oauth_code: "",
            email: identifier,
        };

        let response = match self
            .inner
            .http
            .post(self.endpoint(SESSION_PATH))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return SignInOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            return SignInOutcome::Rejected {
                status: status.as_u16(),
            };
        }

        let tokens: SignInResponse = match response.json().await {
            Ok(tokens) => tokens,
            Err(e) => {
                return SignInOutcome::Failed {
                    reason: SessionError::MalformedResponse {
                        reason: e.to_string(),
                    }
                    .to_string(),
                };
            }
        };

        let Some(token) = tokens.session_token.filter(|t| !t.is_empty()) else {
            return SignInOutcome::MissingToken;
        };

        match self
            .inner
            .credentials
            .set(self.inner.config.credential_key(), &token)
            .await
        {
            Ok(()) => SignInOutcome::SignedIn,
            Err(e) => SignInOutcome::Failed {
                reason: SessionError::from(e).to_string(),
            },
        }
    }

    /// Signs out.
    ///
    /// The server is told on a best-effort basis; whatever it answers, the
    /// stored token is deleted and the session is logged out locally.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) {
        let url = self.endpoint(SESSION_PATH);
        match self
            .fetch_with_auth(Method::DELETE, &url, RequestOptions::default())
            .await
        {
            Ok(response) if response.status().is_success() => debug!("server ended session"),
            Ok(response) => {
                debug!(status = response.status().as_u16(), "server did not confirm sign out");
            }
            Err(e) => warn!(error = %e, "error during sign out"),
        }

        self.forget_token().await;
        self.inner.state.send_modify(|state| {
            state.is_logged_in = false;
            state.has_token = false;
        });
        info!("signed out");
    }

    /// Sends an authenticated request.
    ///
    /// The token is read from the credential store at call time and sent as
    /// `Authorization: Bearer <token>`, replacing any caller-supplied
    /// `Authorization` header. A missing token is sent as an empty bearer
    /// credential, which the server rejects with 401.
    ///
    /// A 401 response marks the session logged out before the response is
    /// handed back. No retries.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be built or the server cannot
    /// be reached. HTTP error statuses are not errors.
    #[instrument(skip(self, options))]
    pub async fn fetch_with_auth(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, SessionError> {
        let token = match self.read_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "could not read stored token, sending request without it");
                None
            }
        };
        let authorization = bearer(token.as_ref())?;

        let mut builder = self.inner.http.request(method, url).headers(options.headers);
        if let Some(body) = &options.json {
            builder = builder.json(body);
        }
        let mut request = builder.build().map_err(|e| SessionError::InvalidRequest {
            reason: e.to_string(),
        })?;
        request.headers_mut().insert(AUTHORIZATION, authorization);

        let response = self
            .inner
            .http
            .execute(request)
            .await
            .map_err(|e| SessionError::Transport {
                reason: e.to_string(),
            })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("server rejected session token, logging out");
            self.inner
                .state
                .send_modify(|state| state.is_logged_in = false);
        }

        Ok(response)
    }

    async fn read_token(&self) -> Result<Option<SessionToken>, SessionError> {
        let stored = self
            .inner
            .credentials
            .get(self.inner.config.credential_key())
            .await?;
        Ok(stored.filter(|t| !t.is_empty()).map(SessionToken::new))
    }

    async fn forget_token(&self) {
        if let Err(e) = self
            .inner
            .credentials
            .delete(self.inner.config.credential_key())
            .await
        {
            warn!(error = %e, "failed to delete stored token");
        }
    }
}

fn bearer(token: Option<&SessionToken>) -> Result<HeaderValue, SessionError> {
    let secret = token.map_or("", SessionToken::expose);
    let mut value = HeaderValue::from_str(&format!("Bearer {secret}"))
        .map_err(|_| SessionError::InvalidToken)?;
    value.set_sensitive(true);
    Ok(value)
}

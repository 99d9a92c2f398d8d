use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::http_client::{read_empty, read_json, ApiFailure, BearerToken, RestClient};
use crate::auth::feed::{AuthSubscription, ChangeFeed};
use crate::auth::providers::IdentityProvider;
use crate::auth::session::{AuthChangeKind, FederatedRedirect, Identity, Session};
use crate::auth::storage::SessionFile;
use crate::config::BackendConfig;
use crate::error::{self, PetcareError, PetcareResult};

const TOKEN_PATH: &str = "/auth/v1/token";
const SIGNUP_PATH: &str = "/auth/v1/signup";
const LOGOUT_PATH: &str = "/auth/v1/logout";
const AUTHORIZE_PATH: &str = "/auth/v1/authorize";

/// Token grant response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Unix seconds
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    user: Identity,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: self.user,
        }
    }
}

/// Identity provider backed by a hosted GoTrue auth service
///
/// The service itself has no push channel, so this adapter holds the current
/// session in memory and emits change events whenever its own calls alter it.
/// With a [`SessionFile`] attached the session also survives restarts.
pub struct GoTrueProvider {
    rest: RestClient,
    redirect_to: String,
    current: RwLock<Option<Session>>,
    bearer: BearerToken,
    feed: ChangeFeed,
    storage: Option<SessionFile>,
}

impl GoTrueProvider {
    pub fn new(config: &BackendConfig) -> PetcareResult<Self> {
        Ok(Self::with_client(RestClient::new(config)?, &config.redirect_to))
    }

    pub fn with_client(rest: RestClient, redirect_to: &str) -> Self {
        Self {
            rest,
            redirect_to: redirect_to.to_string(),
            current: RwLock::new(None),
            bearer: BearerToken::new(),
            feed: ChangeFeed::new(),
            storage: None,
        }
    }

    /// Keep the session in `file`, written on every change
    pub fn with_session_file(mut self, file: SessionFile) -> Self {
        self.storage = Some(file);
        self
    }

    /// Restore the session left in the session file by an earlier run
    ///
    /// An expired session is kept; the next `current_session` refreshes it.
    pub async fn restore_persisted(&self) -> PetcareResult<Option<Session>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let session = storage.load().await?;
        if let Some(session) = &session {
            info!(identity = %session.user.id, "Restored stored session");
        }
        self.restore_session(session.clone()).await;
        Ok(session)
    }

    /// Token holder to share with the record store
    pub fn bearer(&self) -> BearerToken {
        self.bearer.clone()
    }

    /// Install a previously persisted session without emitting a change
    pub async fn restore_session(&self, session: Option<Session>) {
        self.bearer
            .set(session.as_ref().map(|s| s.access_token.clone()))
            .await;
        *self.current.write().await = session;
    }

    async fn install(&self, kind: AuthChangeKind, session: Session) -> Session {
        {
            let mut current = self.current.write().await;
            self.bearer.set(Some(session.access_token.clone())).await;
            *current = Some(session.clone());
        }
        if let Some(storage) = &self.storage {
            // The remote change already happened; a local write failure only costs the next restart
            if let Err(err) = storage.save(&session).await {
                warn!(error = %err, "Could not store session");
            }
        }
        self.feed.emit(kind, Some(session.clone()));
        session
    }

    /// Forget the held session; emits `SignedOut` only if one was held
    async fn clear(&self) {
        let previous = {
            let mut current = self.current.write().await;
            self.bearer.set(None).await;
            current.take()
        };
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.clear().await {
                warn!(error = %err, "Could not remove stored session");
            }
        }
        if previous.is_some() {
            self.feed.emit(AuthChangeKind::SignedOut, None);
        }
    }

    async fn grant(&self, grant_type: &str, body: Value) -> PetcareResult<Result<Session, ApiFailure>> {
        let response = self
            .rest
            .request(Method::POST, TOKEN_PATH)
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()
            .await;

        let outcome = read_json::<TokenResponse, _>(response, |e| {
            error::auth_request_failed(grant_type, e)
        })
        .await?;
        Ok(outcome.map(TokenResponse::into_session))
    }

    /// Trade the refresh token for a new session
    ///
    /// A rejected refresh signs the user out; transport failures are returned.
    async fn refresh(&self, stale: &Session) -> PetcareResult<Option<Session>> {
        let Some(refresh_token) = stale.refresh_token.clone() else {
            debug!(identity = %stale.user.id, "Expired session has no refresh token");
            self.clear().await;
            return Ok(None);
        };

        match self
            .grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?
        {
            Ok(session) => {
                debug!(identity = %session.user.id, "Session refreshed");
                Ok(Some(self.install(AuthChangeKind::TokenRefreshed, session).await))
            }
            Err(failure) => {
                warn!(error = %failure.describe(), "Refresh rejected, signing out");
                self.clear().await;
                Ok(None)
            }
        }
    }
}

fn sign_in_failure(failure: &ApiFailure) -> PetcareError {
    let body = &failure.body;
    if body.has_code("invalid_grant")
        || body.has_code("invalid_credentials")
        || body.mentions("invalid login credentials")
    {
        error::invalid_credentials()
    } else {
        error::auth_request_failed("sign_in", failure.describe())
    }
}

fn sign_up_failure(email: &str, failure: &ApiFailure) -> PetcareError {
    let body = &failure.body;
    if body.has_code("user_already_exists")
        || body.has_code("email_exists")
        || body.mentions("already registered")
    {
        error::user_already_exists(email)
    } else {
        error::auth_request_failed("sign_up", failure.describe())
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    fn name(&self) -> &str {
        "gotrue"
    }

    async fn current_session(&self) -> PetcareResult<Option<Session>> {
        let held = self.current.read().await.clone();
        match held {
            Some(session) if session.is_expired() => self.refresh(&session).await,
            other => Ok(other),
        }
    }

    fn subscribe(&self) -> AuthSubscription {
        self.feed.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> PetcareResult<Session> {
        let body = json!({ "email": email, "password": password });
        match self.grant("password", body).await? {
            Ok(session) => {
                info!(identity = %session.user.id, "Signed in");
                Ok(self.install(AuthChangeKind::SignedIn, session).await)
            }
            Err(failure) => {
                debug!(error = %failure.describe(), "Sign-in rejected");
                Err(sign_in_failure(&failure))
            }
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: HashMap<String, Value>,
    ) -> PetcareResult<Identity> {
        let response = self
            .rest
            .request(Method::POST, SIGNUP_PATH)
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await;

        let body: Value = match read_json(response, |e| error::auth_request_failed("sign_up", e)).await? {
            Ok(body) => body,
            Err(failure) => return Err(sign_up_failure(email, &failure)),
        };

        // With email confirmation off the service returns a full session
        if body.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(body)
                .map_err(|e| error::response_invalid("sign-up session", e))?
                .into_session();
            let identity = session.user.clone();
            self.install(AuthChangeKind::SignedIn, session).await;
            info!(identity = %identity.id, "Registered identity with session");
            return Ok(identity);
        }

        let user = body.get("user").cloned().unwrap_or(body);
        let identity: Identity =
            serde_json::from_value(user).map_err(|e| error::response_invalid("sign-up user", e))?;
        info!(identity = %identity.id, "Registered identity");
        Ok(identity)
    }

    async fn sign_in_with_federated(&self, provider: &str) -> PetcareResult<FederatedRedirect> {
        let url = Url::parse_with_params(
            &self.rest.url(AUTHORIZE_PATH),
            &[("provider", provider), ("redirect_to", self.redirect_to.as_str())],
        )
        .map_err(|e| error::config_invalid("backend.url", &e.to_string()))?;

        Ok(FederatedRedirect {
            provider: provider.to_string(),
            url: url.to_string(),
        })
    }

    async fn sign_out(&self) -> PetcareResult<()> {
        let token = self
            .current
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone());

        let mut revoke = Ok(());
        if let Some(token) = token {
            let response = self
                .rest
                .authorized(Method::POST, LOGOUT_PATH, &token)
                .send()
                .await;
            revoke = match read_empty(response, |e| error::auth_request_failed("sign_out", e)).await {
                Ok(Ok(())) => Ok(()),
                // The token is already unknown to the service
                Ok(Err(failure))
                    if matches!(
                        failure.status,
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
                    ) =>
                {
                    Ok(())
                }
                Ok(Err(failure)) => Err(error::auth_request_failed("sign_out", failure.describe())),
                Err(err) => Err(err),
            };
        }

        // The local session goes away even if the revoke call failed
        self.clear().await;
        revoke
    }
}

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, ApiResponse, HttpTransport, Method, RequestBody};

use super::store::KeyValueStore;
use super::token;

/// Store key holding the serialized credential pair
pub const TOKEN_KEY: &str = "tokens";

/// Token issuance endpoint
const TOKEN_PATH: &str = "/token/";

/// Token refresh endpoint
const REFRESH_PATH: &str = "/token/refresh/";

/// Refresh this long before the access token expires (1 minute)
pub const REFRESH_MARGIN_MS: i64 = 60_000;

/// Access/refresh token pair as issued by the server and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    fn is_complete(&self) -> bool {
        !self.access.is_empty() && !self.refresh.is_empty()
    }
}

#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// The refresh endpoint only rotates the refresh token on some servers.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Observable authentication state.
///
/// Both tokens are set together or not at all, so `is_authenticated`
/// is derived rather than stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Bumped on login and logout; refresh results from an older epoch are dropped.
    epoch: u64,
}

impl SessionState {
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    fn credentials(&self) -> Option<CredentialPair> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some(CredentialPair {
                access: access.clone(),
                refresh: refresh.clone(),
            }),
            _ => None,
        }
    }

    fn set_credentials(&mut self, pair: CredentialPair) {
        self.access_token = Some(pair.access);
        self.refresh_token = Some(pair.refresh);
    }

    fn clear(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
    }
}

/// What `schedule_token_refresh` decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    /// No access token, or its expiry could not be read; nothing armed.
    UnknownExpiry,
    /// Expired or inside the refresh margin; refresh right away.
    RefreshNow { expired: bool },
    /// Timer armed to fire after `delay`.
    Armed { delay: Duration },
}

/// Decide when to refresh a token expiring at `expiration_ms`.
pub fn plan_refresh(expiration_ms: Option<i64>, now_ms: i64) -> RefreshPlan {
    let Some(expiration_ms) = expiration_ms else {
        return RefreshPlan::UnknownExpiry;
    };

    let remaining = expiration_ms.saturating_sub(now_ms);
    if remaining <= REFRESH_MARGIN_MS {
        RefreshPlan::RefreshNow {
            expired: remaining <= 0,
        }
    } else {
        RefreshPlan::Armed {
            delay: Duration::from_millis((remaining - REFRESH_MARGIN_MS) as u64),
        }
    }
}

struct ScheduledRefresh {
    id: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<SessionState>,
    timer: Mutex<Option<ScheduledRefresh>>,
    timer_seq: AtomicU64,
    refresh_lock: AsyncMutex<()>,
    /// Held across every epoch change and the store write that follows it,
    /// so the stored pair always matches the latest epoch.
    store_lock: Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(scheduled) = self.timer.get_mut().take() {
            scheduled.handle.abort();
        }
    }
}

/// Owns the session tokens: persists them, keeps them fresh, and wraps
/// API calls with bearer auth plus a single retry after a refresh.
///
/// Clone is cheap; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn HttpTransport>, store: Arc<dyn KeyValueStore>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                state,
                timer: Mutex::new(None),
                timer_seq: AtomicU64::new(0),
                refresh_lock: AsyncMutex::new(()),
                store_lock: Mutex::new(()),
            }),
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receive every state change (login, refresh, logout)
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.borrow().access_token.clone()
    }

    /// Restore a persisted session. Returns true if one was found.
    ///
    /// The token is not validated; an expired one is refreshed on first use.
    pub fn initialize(&self) -> bool {
        let stored = match self.inner.store.get(TOKEN_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to read stored tokens");
                return false;
            }
        };

        let Some(raw) = stored else {
            debug!("No stored session");
            return false;
        };

        let pair: CredentialPair = match serde_json::from_str(&raw) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed stored tokens");
                return false;
            }
        };

        if !pair.is_complete() {
            warn!("Ignoring incomplete stored tokens");
            return false;
        }

        self.inner.state.send_modify(|state| state.set_credentials(pair));
        info!("Session restored from store");
        true
    }

    /// Exchange username/password for a token pair.
    ///
    /// On failure the session is left untouched and the error is returned
    /// for the caller to present (see `api::error_message`).
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(), ApiError> {
        let request = ApiRequest::new(Method::Post, TOKEN_PATH).json(json!({
            "username": credentials.username,
            "password": credentials.password,
        }));

        let pair = self
            .inner
            .transport
            .execute(request)
            .await
            .and_then(|response| response.json::<CredentialPair>())
            .and_then(|pair| {
                if pair.is_complete() {
                    Ok(pair)
                } else {
                    Err(ApiError::InvalidResponse(
                        "token response is missing a token".to_string(),
                    ))
                }
            });

        let pair = match pair {
            Ok(pair) => pair,
            Err(e) => {
                warn!(username = %credentials.username, error = %e, "Login failed");
                return Err(e);
            }
        };

        let store_guard = self.inner.store_lock.lock();
        let stored = pair.clone();
        self.inner.state.send_modify(|state| {
            state.epoch += 1;
            state.set_credentials(pair);
        });
        persist(self.inner.store.as_ref(), &stored);
        drop(store_guard);
        info!(username = %credentials.username, "Logged in");

        self.schedule_token_refresh();
        Ok(())
    }

    /// Drop the session and its persisted copy. Never fails.
    pub fn logout(&self) {
        self.cancel_scheduled_refresh();

        let store_guard = self.inner.store_lock.lock();
        self.inner.state.send_modify(|state| {
            state.clear();
            state.epoch += 1;
        });
        if let Err(e) = self.inner.store.remove(TOKEN_KEY) {
            warn!(error = %e, "Failed to remove stored tokens");
        }
        drop(store_guard);
        info!("Logged out");
    }

    /// Obtain a new access token using the refresh token.
    ///
    /// Any failure logs the user out. Fails without a network call when no
    /// refresh token is held.
    pub async fn refresh_access_token(&self) -> Result<(), ApiError> {
        self.refresh(None).await
    }

    /// Single-flight refresh. `rejected` is the access token a server just
    /// refused; if another caller already replaced it, no new refresh is made.
    async fn refresh(&self, rejected: Option<&str>) -> Result<(), ApiError> {
        let _guard = self.inner.refresh_lock.lock().await;

        let (refresh_token, access_token, epoch) = {
            let state = self.inner.state.borrow();
            (
                state.refresh_token.clone(),
                state.access_token.clone(),
                state.epoch,
            )
        };

        let Some(refresh_token) = refresh_token else {
            debug!("No refresh token, login required");
            return Err(ApiError::NotAuthenticated);
        };

        if let Some(rejected) = rejected {
            if access_token.as_deref() != Some(rejected) {
                debug!("Access token already rotated by a concurrent refresh");
                return Ok(());
            }
        }

        debug!("Requesting fresh access token");
        let request =
            ApiRequest::new(Method::Post, REFRESH_PATH).json(json!({ "refresh": refresh_token }));

        let outcome = self
            .inner
            .transport
            .execute(request)
            .await
            .and_then(|response| response.json::<RefreshResponse>())
            .and_then(|response| {
                if response.access.is_empty() {
                    Err(ApiError::InvalidResponse(
                        "refresh response is missing the access token".to_string(),
                    ))
                } else {
                    Ok(response)
                }
            });

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                let current_epoch = self.inner.state.borrow().epoch;
                if current_epoch == epoch {
                    self.logout();
                }
                return Err(e);
            }
        };

        let store_guard = self.inner.store_lock.lock();
        let mut updated = None;
        let applied = self.inner.state.send_if_modified(|state| {
            if state.epoch != epoch {
                return false;
            }
            state.access_token = Some(response.access);
            if let Some(rotated) = response.refresh.filter(|r| !r.is_empty()) {
                state.refresh_token = Some(rotated);
            }
            updated = state.credentials();
            true
        });
        if let Some(ref pair) = updated {
            persist(self.inner.store.as_ref(), pair);
        }
        drop(store_guard);

        if !applied {
            info!("Session changed during refresh, discarding new token");
            return Err(ApiError::SessionChanged);
        }

        info!("Access token refreshed");
        self.arm_refresh(false);
        Ok(())
    }

    /// Expiry of the current access token in milliseconds since the epoch.
    pub fn token_expiration_time(&self) -> Option<i64> {
        self.inner
            .state
            .borrow()
            .access_token
            .as_deref()
            .and_then(token::expiration_millis)
    }

    /// Replace any pending refresh timer based on the current token's expiry.
    ///
    /// Must be called from within a tokio runtime for a refresh to be started.
    pub fn schedule_token_refresh(&self) -> RefreshPlan {
        self.arm_refresh(true)
    }

    /// True while a proactive refresh timer is pending
    pub fn has_scheduled_refresh(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    fn cancel_scheduled_refresh(&self) {
        if let Some(scheduled) = self.inner.timer.lock().take() {
            scheduled.handle.abort();
            debug!("Cancelled scheduled token refresh");
        }
    }

    /// `allow_immediate` is false right after a refresh, so a server handing
    /// out already-expiring tokens cannot cause a refresh loop.
    fn arm_refresh(&self, allow_immediate: bool) -> RefreshPlan {
        let mut slot = self.inner.timer.lock();
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }

        let plan = plan_refresh(self.token_expiration_time(), Utc::now().timestamp_millis());

        match plan {
            RefreshPlan::UnknownExpiry => {
                debug!("Could not determine token expiration time");
            }
            RefreshPlan::RefreshNow { expired } => {
                if !allow_immediate {
                    warn!(expired, "Fresh token is already near expiry, not refreshing again");
                    return plan;
                }
                let Ok(runtime) = Handle::try_current() else {
                    warn!("No async runtime, token refresh not started");
                    return plan;
                };
                info!(expired, "Token expired or expiring soon, refreshing now");
                // Refreshes queued for the same token collapse into one
                let current = self.access_token();
                let weak = Arc::downgrade(&self.inner);
                runtime.spawn(async move {
                    if let Some(manager) = Self::upgrade(&weak) {
                        let _ = manager.refresh(current.as_deref()).await;
                    }
                });
            }
            RefreshPlan::Armed { delay } => {
                let Ok(runtime) = Handle::try_current() else {
                    warn!("No async runtime, token refresh not scheduled");
                    return plan;
                };
                let id = self.inner.timer_seq.fetch_add(1, Ordering::Relaxed) + 1;
                let weak = Arc::downgrade(&self.inner);
                let handle = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(manager) = Self::upgrade(&weak) else {
                        return;
                    };
                    // Leave the slot before refreshing, which re-arms it
                    {
                        let mut slot = manager.inner.timer.lock();
                        if slot.as_ref().map(|s| s.id) == Some(id) {
                            slot.take();
                        }
                    }
                    debug!("Proactively refreshing token before expiration");
                    if let Err(e) = manager.refresh_access_token().await {
                        debug!(error = %e, "Scheduled token refresh failed");
                    }
                });
                *slot = Some(ScheduledRefresh { id, handle });
                debug!(delay_secs = delay.as_secs(), "Token refresh scheduled");
            }
        }

        plan
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Call an API endpoint with the bearer token and decode the JSON reply.
    ///
    /// A 401 triggers one refresh; if it succeeds the request is sent once
    /// more, otherwise the original 401 is returned. Other errors are
    /// returned unchanged. `body` is only sent for POST and PUT.
    pub async fn make_authenticated_request<T: DeserializeOwned>(
        &self,
        path: &str,
        method: Method,
        body: Option<RequestBody>,
    ) -> Result<T, ApiError> {
        self.make_authenticated_raw(path, method, body).await?.json()
    }

    /// Like `make_authenticated_request`, without decoding the body.
    pub async fn make_authenticated_raw(
        &self,
        path: &str,
        method: Method,
        body: Option<RequestBody>,
    ) -> Result<ApiResponse, ApiError> {
        let body = if method.allows_body() {
            body.unwrap_or_default()
        } else {
            RequestBody::Empty
        };
        let request = ApiRequest::new(method, path).with_body(body);

        let (result, used_token) = self.send_authenticated(request.clone()).await;
        let error = match result {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        if !error.is_unauthorized() {
            debug!(path, method = %method, error = %error, "Request failed");
            return Err(error);
        }

        info!(path, method = %method, "Request unauthorized, attempting token refresh");
        if let Err(refresh_error) = self.refresh(used_token.as_deref()).await {
            debug!(error = %refresh_error, "Token refresh failed, user needs to login again");
            return Err(error);
        }

        debug!(path, "Token refreshed, retrying request");
        self.send_authenticated(request).await.0
    }

    async fn send_authenticated(
        &self,
        mut request: ApiRequest,
    ) -> (Result<ApiResponse, ApiError>, Option<String>) {
        let token = self.access_token();
        request.bearer = token.clone();
        (self.inner.transport.execute(request).await, token)
    }
}

fn persist(store: &dyn KeyValueStore, pair: &CredentialPair) {
    let result = serde_json::to_string(pair)
        .map_err(anyhow::Error::from)
        .and_then(|contents| store.set(TOKEN_KEY, &contents));
    if let Err(e) = result {
        warn!(error = %e, "Failed to persist tokens");
    }
}

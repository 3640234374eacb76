use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::storage::{
    Persistence, SessionStorage, REDIRECT_URL_KEY, REFRESH_TOKEN_KEY, TOKEN_KEY, USER_KEY,
};
use super::token;
use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::models::{
    AuthResponse, LoginRequest, MeResponse, RefreshRequest, RefreshResponse, RegisterRequest,
    User,
};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const ME_PATH: &str = "/auth/me";

/// A complete signed-in session as it sits in storage.
#[derive(Clone, PartialEq)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: User,
    pub persistence: Persistence,
    pub remember_preference: bool,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("user_id", &self.user.id)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("persistence", &self.persistence)
            .field("remember_preference", &self.remember_preference)
            .finish()
    }
}

/// Owns the session: tokens, user snapshot, and where they are stored.
///
/// All reads and writes of credential state go through here. Calls to the
/// `/auth/*` endpoints are made directly on the transport so that token
/// refresh never re-enters the gateway's 401 handling.
pub struct SessionManager {
    storage: SessionStorage,
    transport: Arc<dyn Transport>,
    /// Held while a refresh is in flight so concurrent 401s share one call
    refresh_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(storage: SessionStorage, transport: Arc<dyn Transport>) -> Self {
        Self {
            storage,
            transport,
            refresh_lock: Mutex::new(()),
        }
    }

    // =========================================================================
    // Backend operations
    // =========================================================================

    /// Sign in. `remember` selects durable storage over ephemeral.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<CredentialRecord, AuthError> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
        let response = self.call(request).await.map_err(|e| {
            warn!(error = %e, "Login failed");
            AuthError::from(e)
        })?;
        let auth: AuthResponse = response.json()?;
        self.establish(auth, Persistence::from_remember(remember)).await
    }

    /// Create an account. Registration always keeps the session durably.
    pub async fn register(&self, data: &RegisterRequest) -> Result<CredentialRecord, AuthError> {
        let request = ApiRequest::post(REGISTER_PATH).json(data)?;
        let response = self.call(request).await.map_err(|e| {
            warn!(error = %e, "Registration failed");
            AuthError::from(e)
        })?;
        let auth: AuthResponse = response.json()?;
        self.establish(auth, Persistence::Durable).await
    }

    /// Sign out. The backend is told on a best-effort basis; local state is
    /// always cleared. The remember preference is left alone.
    pub async fn logout(&self) {
        if let Some(token) = self.token() {
            let request = ApiRequest::post(LOGOUT_PATH).bearer(Some(token));
            match self.call(request).await {
                Ok(_) => debug!("Backend acknowledged logout"),
                Err(e) => warn!(error = %e, "Logout request failed"),
            }
        }
        self.clear();
        info!("Logged out");
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// The new token goes into the tier the session already lives in. Any
    /// failure, including a missing refresh token, ends the session.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let Some(refresh_token) = self.refresh_token() else {
            warn!("Refresh requested without a refresh token");
            self.clear();
            return Err(AuthError::no_refresh_token());
        };

        let persistence = self.persistence();
        match self.request_refresh(&refresh_token).await {
            Ok(response) => {
                let token = response
                    .token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| AuthError::invalid_response("Refresh response did not include a token"));
                let token = match token {
                    Ok(token) => token,
                    Err(e) => {
                        self.clear();
                        return Err(e);
                    }
                };
                self.storage
                    .set(persistence, TOKEN_KEY, &token)
                    .map_err(|e| AuthError::storage(&e))?;
                if let Some(rotated) = response.refresh_token.filter(|t| !t.is_empty()) {
                    self.storage
                        .set(persistence, REFRESH_TOKEN_KEY, &rotated)
                        .map_err(|e| AuthError::storage(&e))?;
                }
                info!(?persistence, "Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.clear();
                Err(e.into())
            }
        }
    }

    /// Refresh unless another caller already replaced `stale_token`.
    ///
    /// At most one refresh is outstanding; callers arriving while it runs
    /// wait for it and then reuse the token it stored.
    pub async fn refresh_after(&self, stale_token: Option<&str>) -> Result<String, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.token() {
            if stale_token != Some(current.as_str()) {
                debug!("Token already refreshed by a concurrent request");
                return Ok(current);
            }
        }
        self.refresh().await
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest { refresh_token })?;
        self.call(request).await?.json()
    }

    async fn fetch_user_with(&self, token: &str) -> Result<User, AuthError> {
        let request = ApiRequest::get(ME_PATH).bearer(Some(token.to_string()));
        let me: MeResponse = self.call(request).await?.json()?;
        me.user
            .ok_or_else(|| AuthError::invalid_response("Profile response did not include a user"))
    }

    /// Send straight to the transport and turn error statuses into `ApiError`
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        debug!(method = %request.method, path = %request.path, "Auth request");
        let response = self.transport.send(&request).await?;
        if response.status.is_success() {
            Ok(response)
        } else {
            debug!(status = %response.status, path = %request.path, "Auth request rejected");
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    /// Turn a login/registration response into a stored record.
    ///
    /// Token and user are stored together or not at all: a response without
    /// a user snapshot is completed from `/auth/me` first.
    async fn establish(
        &self,
        auth: AuthResponse,
        persistence: Persistence,
    ) -> Result<CredentialRecord, AuthError> {
        let access_token = auth
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::invalid_response("Response did not include an access token"))?;

        let user = match auth.user {
            Some(user) => user,
            None => {
                debug!("No user in auth response, fetching profile");
                self.fetch_user_with(&access_token).await?
            }
        };

        let record = CredentialRecord {
            access_token,
            refresh_token: auth.refresh_token.filter(|t| !t.is_empty()),
            user,
            persistence,
            remember_preference: persistence == Persistence::Durable,
        };
        self.store_record(&record)?;
        info!(user_id = %record.user.id, ?persistence, "Session established");
        Ok(record)
    }

    fn store_record(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        let tier = record.persistence;
        self.storage.clear_credentials_in(other_tier(tier));

        let user = serde_json::to_string(&record.user)
            .map_err(|e| AuthError::invalid_response(format!("Failed to encode user: {}", e)))?;

        let write = || -> anyhow::Result<()> {
            self.storage.set(tier, TOKEN_KEY, &record.access_token)?;
            match record.refresh_token {
                Some(ref refresh) => self.storage.set(tier, REFRESH_TOKEN_KEY, refresh)?,
                None => self.storage.remove(tier, REFRESH_TOKEN_KEY)?,
            }
            self.storage.set(tier, USER_KEY, &user)?;
            self.storage.set_remember_me(record.remember_preference)?;
            Ok(())
        };

        write().map_err(|e| {
            self.storage.clear_credentials_in(tier);
            AuthError::storage(&e)
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True iff a token is stored and its expiry is readable and in the future
    pub fn is_authenticated(&self) -> bool {
        self.token()
            .map(|t| !token::is_token_expired(&t))
            .unwrap_or(false)
    }

    pub fn is_token_expired(&self, token: &str) -> bool {
        token::is_token_expired(token)
    }

    pub fn is_token_expiring_soon(&self, token: &str) -> bool {
        token::is_token_expiring_soon(token)
    }

    /// Whether the stored token should be refreshed pre-emptively
    pub fn needs_refresh(&self) -> bool {
        self.token()
            .map(|t| token::is_token_expiring_soon(&t))
            .unwrap_or(false)
    }

    pub fn token(&self) -> Option<String> {
        self.storage.get(TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.storage.get(REFRESH_TOKEN_KEY)
    }

    pub fn current_user(&self) -> Option<User> {
        let raw = self.storage.get(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Stored user snapshot is unreadable");
                None
            }
        }
    }

    pub fn remember_preference(&self) -> bool {
        self.storage.remember_me()
    }

    /// Tier holding the current token, else the one the preference selects
    pub fn persistence(&self) -> Persistence {
        self.storage
            .locate(TOKEN_KEY)
            .unwrap_or_else(|| Persistence::from_remember(self.remember_preference()))
    }

    /// The stored record, when both token and user are present
    pub fn record(&self) -> Option<CredentialRecord> {
        let access_token = self.token()?;
        let user = self.current_user()?;
        Some(CredentialRecord {
            access_token,
            refresh_token: self.refresh_token(),
            user,
            persistence: self.persistence(),
            remember_preference: self.remember_preference(),
        })
    }

    // =========================================================================
    // Direct state changes
    // =========================================================================

    /// Store an access token in the tier `remember` selects, moving the rest
    /// of the record along so it never straddles tiers.
    pub fn set_token(&self, token: &str, remember: bool) -> Result<(), AuthError> {
        let tier = Persistence::from_remember(remember);
        self.relocate(tier).map_err(|e| AuthError::storage(&e))?;
        self.storage
            .set(tier, TOKEN_KEY, token)
            .and_then(|_| self.storage.set_remember_me(remember))
            .map_err(|e| AuthError::storage(&e))
    }

    pub fn set_refresh_token(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.storage
            .set(self.persistence(), REFRESH_TOKEN_KEY, refresh_token)
            .map_err(|e| AuthError::storage(&e))
    }

    pub fn set_user(&self, user: &User) -> Result<(), AuthError> {
        let raw = serde_json::to_string(user)
            .map_err(|e| AuthError::invalid_response(format!("Failed to encode user: {}", e)))?;
        self.storage
            .set(self.persistence(), USER_KEY, &raw)
            .map_err(|e| AuthError::storage(&e))
    }

    /// Merge profile changes into the stored user (not a replacement)
    pub fn merge_user(&self, patch: &Map<String, Value>) -> Result<User, AuthError> {
        let merged = match self.current_user() {
            Some(user) => user.merged(patch),
            None => serde_json::from_value(Value::Object(patch.clone())),
        }
        .map_err(|e| AuthError::invalid_response(format!("Failed to merge profile: {}", e)))?;
        self.set_user(&merged)?;
        Ok(merged)
    }

    /// Drop token, refresh token and user from both tiers
    pub fn clear(&self) {
        self.storage.clear_credentials();
        debug!("Session cleared");
    }

    /// Remember where the user was headed before being sent to login
    pub fn remember_redirect(&self, path: &str) {
        if let Err(e) = self.storage.set(Persistence::Ephemeral, REDIRECT_URL_KEY, path) {
            warn!(error = %e, "Failed to remember redirect");
        }
    }

    /// Take (and forget) the remembered destination
    pub fn take_redirect(&self) -> Option<String> {
        let path = self.storage.get_in(Persistence::Ephemeral, REDIRECT_URL_KEY)?;
        if let Err(e) = self.storage.remove(Persistence::Ephemeral, REDIRECT_URL_KEY) {
            warn!(error = %e, "Failed to forget redirect");
        }
        Some(path)
    }

    fn relocate(&self, to: Persistence) -> anyhow::Result<()> {
        let from = other_tier(to);
        for key in [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Some(value) = self.storage.get_in(from, key) {
                self.storage.set(to, key, &value)?;
                self.storage.remove(from, key)?;
            }
        }
        Ok(())
    }
}

fn other_tier(persistence: Persistence) -> Persistence {
    match persistence {
        Persistence::Durable => Persistence::Ephemeral,
        Persistence::Ephemeral => Persistence::Durable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TransportError;
    use crate::auth::AuthErrorKind;
    use crate::auth::token::tests::token_expiring_in;
    use async_trait::async_trait;

    /// Transport that must never be called
    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            Err(TransportError::NoResponse("offline".to_string()))
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(SessionStorage::in_memory(), Arc::new(Offline))
    }

    fn user(json: serde_json::Value) -> User {
        serde_json::from_value(json).expect("user")
    }

    #[test]
    fn test_set_token_round_trip_durable() {
        let session = manager();
        session.set_token("t1", true).expect("set");
        assert_eq!(session.token().as_deref(), Some("t1"));
        assert_eq!(session.persistence(), Persistence::Durable);
        assert!(session.remember_preference());
    }

    #[test]
    fn test_set_token_round_trip_ephemeral_leaves_durable_empty() {
        let session = manager();
        session.set_token("t2", false).expect("set");
        assert_eq!(session.token().as_deref(), Some("t2"));
        assert_eq!(session.persistence(), Persistence::Ephemeral);
        assert_eq!(session.storage.get_in(Persistence::Durable, TOKEN_KEY), None);
        assert!(!session.remember_preference());
    }

    #[test]
    fn test_switching_tiers_moves_whole_record() {
        let session = manager();
        session.set_token("t1", true).expect("set");
        session.set_user(&user(serde_json::json!({"id": 1}))).expect("user");

        session.set_token("t2", false).expect("set");

        assert_eq!(session.storage.get_in(Persistence::Durable, TOKEN_KEY), None);
        assert_eq!(session.storage.get_in(Persistence::Durable, USER_KEY), None);
        assert!(session.storage.get_in(Persistence::Ephemeral, USER_KEY).is_some());
        assert_eq!(session.token().as_deref(), Some("t2"));
    }

    #[test]
    fn test_is_authenticated_tracks_expiry() {
        let session = manager();
        assert!(!session.is_authenticated());

        session.set_token(&token_expiring_in(3600), false).expect("set");
        assert!(session.is_authenticated());

        session.set_token(&token_expiring_in(-1), false).expect("set");
        assert!(!session.is_authenticated());
        // no implicit logout
        assert!(session.token().is_some());
    }

    #[test]
    fn test_malformed_token_is_not_authenticated() {
        let session = manager();
        session.set_token("mock-jwt-token-abc", true).expect("set");
        assert!(!session.is_authenticated());
        assert!(!session.needs_refresh());
    }

    #[test]
    fn test_merge_user_keeps_existing_fields() {
        let session = manager();
        session.set_token("t", true).expect("set");
        session
            .set_user(&user(serde_json::json!({"id": 1, "firstName": "John", "city": "Johannesburg"})))
            .expect("user");

        let patch = serde_json::json!({"city": "Cape Town"});
        let merged = session
            .merge_user(patch.as_object().expect("object"))
            .expect("merge");

        assert_eq!(merged.first_name.as_deref(), Some("John"));
        assert_eq!(session.current_user(), Some(merged));
    }

    #[test]
    fn test_record_requires_token_and_user() {
        let session = manager();
        session.set_token("t", false).expect("set");
        assert!(session.record().is_none());

        session.set_user(&user(serde_json::json!({"id": 5}))).expect("user");
        let record = session.record().expect("record");
        assert_eq!(record.persistence, Persistence::Ephemeral);
        assert!(!format!("{:?}", record).contains("\"t\""));
    }

    #[test]
    fn test_redirect_slot_is_taken_once() {
        let session = manager();
        session.remember_redirect("/bookings?page=2");
        assert_eq!(session.take_redirect().as_deref(), Some("/bookings?page=2"));
        assert_eq!(session.take_redirect(), None);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_and_keeps_preference() {
        let session = manager();
        session.set_token("t", true).expect("set");
        session.set_refresh_token("r").expect("refresh");

        session.logout().await;
        let after_first = (session.token(), session.refresh_token(), session.current_user());
        session.logout().await;

        assert_eq!(after_first, (None, None, None));
        assert_eq!((session.token(), session.refresh_token(), session.current_user()), (None, None, None));
        assert!(session.remember_preference());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let session = manager();
        session.set_token("t", true).expect("set");

        let err = session.refresh().await.expect_err("should fail");
        assert_eq!(err.kind, AuthErrorKind::NoRefreshToken);
        assert!(session.token().is_none());
    }
}

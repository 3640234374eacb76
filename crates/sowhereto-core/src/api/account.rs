//! Account endpoints that read or update the signed-in user.
//!
//! These go through the gateway (bearer attached, 401 retried once) and keep
//! the session's user snapshot in step with the backend.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{ApiClient, ApiRequest};
use crate::auth::AuthError;
use crate::models::{
    BlacklistUpdate, ChangePasswordRequest, ForgotPasswordRequest, MeResponse, MessageResponse,
    ResetPasswordRequest, User, VerifyEmailRequest,
};

const ME_PATH: &str = "/auth/me";
const PROFILE_PATH: &str = "/auth/profile";
const CHANGE_PASSWORD_PATH: &str = "/auth/change-password";
const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";
const BLACKLIST_PATH: &str = "/user/blacklist";

impl ApiClient {
    /// Fetch the signed-in user and store the snapshot
    pub async fn fetch_current_user(&self) -> Result<User, AuthError> {
        let me: MeResponse = self.get(ME_PATH).await?;
        let user = me
            .user
            .ok_or_else(|| AuthError::invalid_response("Profile response did not include a user"))?;
        self.session().set_user(&user)?;
        Ok(user)
    }

    /// Application-start recovery.
    ///
    /// With a stored token, re-read the user from the backend. A 401 ends the
    /// session; other failures keep it and are returned. `Ok(None)` when
    /// nothing was stored.
    pub async fn restore_session(&self) -> Result<Option<User>, AuthError> {
        if self.session().token().is_none() {
            debug!("No stored session to restore");
            return Ok(None);
        }

        match self.fetch_current_user().await {
            Ok(user) => {
                info!(user_id = %user.id, "Session restored");
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => {
                warn!("Stored session was rejected, clearing");
                self.session().clear();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Update profile fields. The backend's copy of the user, when returned,
    /// is merged into the stored snapshot; otherwise the patch is. Fields the
    /// response leaves out keep their stored values.
    pub async fn update_profile(&self, patch: &Map<String, Value>) -> Result<User, AuthError> {
        let response = self.send(ApiRequest::put(PROFILE_PATH).json(patch)?).await?;
        let returned = response
            .json::<Value>()
            .ok()
            .and_then(|mut body| match body.get_mut("user").map(Value::take) {
                Some(Value::Object(user)) => Some(user),
                _ => None,
            });

        let user = self.session().merge_user(returned.as_ref().unwrap_or(patch))?;
        info!(user_id = %user.id, fields = patch.len(), "Profile updated");
        Ok(user)
    }

    /// Replace the list of places the user never wants to visit
    pub async fn update_blacklist(&self, places: &[String]) -> Result<User, AuthError> {
        let body = BlacklistUpdate { blacklist: places };
        self.send(ApiRequest::put(BLACKLIST_PATH).json(&body)?).await?;

        let mut patch = Map::new();
        patch.insert("blacklist".to_string(), Value::from(places.to_vec()));
        let user = self.session().merge_user(&patch)?;
        info!(count = places.len(), "Blacklist updated");
        Ok(user)
    }

    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<(), AuthError> {
        let body = ChangePasswordRequest {
            current_password,
            new_password,
        };
        self.send(ApiRequest::put(CHANGE_PASSWORD_PATH).json(&body)?).await?;
        info!("Password changed");
        Ok(())
    }

    /// Ask for a reset link. Returns the backend's acknowledgement, if any.
    pub async fn forgot_password(&self, email: &str) -> Result<Option<String>, AuthError> {
        let ack: MessageResponse = self
            .post_unauthenticated(FORGOT_PASSWORD_PATH, &ForgotPasswordRequest { email })
            .await?;
        Ok(ack.message)
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<Option<String>, AuthError> {
        let ack: MessageResponse = self
            .post_unauthenticated(RESET_PASSWORD_PATH, &ResetPasswordRequest { token, password })
            .await?;
        Ok(ack.message)
    }

    pub async fn verify_email(&self, token: &str) -> Result<Option<String>, AuthError> {
        let ack: MessageResponse = self
            .post_unauthenticated(VERIFY_EMAIL_PATH, &VerifyEmailRequest { token })
            .await?;
        Ok(ack.message)
    }

    /// Credential-free POST whose empty or non-JSON success body is not an
    /// error. Goes out without a bearer, so a stored session is never
    /// refreshed or ended by it.
    async fn post_unauthenticated<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<MessageResponse, AuthError> {
        let response = self.send_anonymous(ApiRequest::post(path).json(body)?).await?;
        Ok(response.json().unwrap_or_default())
    }
}

//! Authentication session: sign-in flows, the cached user and session events.

use std::sync::{Arc, RwLock};

use adhders_shared::{
    ApiError, ExternalLoginRequest, ForgotPasswordRequest, LoginRequest, Palette, RegisterRequest,
    RegisterResponse, ResetPasswordRequest, TokenResponse, User,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::identity::{ExternalIdentity, IdentityProvider};
use crate::storage::{self, SharedStore, KEY_CREDENTIALS, KEY_PALETTE, KEY_USER};
use crate::token_store::TokenStore;

const REGISTER_PATH: &str = "/api/auth/register";
const LOGIN_PATH: &str = "/api/auth/login";
const PROFILE_PATH: &str = "/api/auth/me";
const VALIDATE_PATH: &str = "/api/me";
const EXTERNAL_LOGIN_PATH: &str = "/api/auth/google";
const FORGOT_PASSWORD_PATH: &str = "/api/auth/forgot-password";
const RESET_PASSWORD_PATH: &str = "/api/auth/reset-password";

/// User-facing authentication failures. `Display` is the message to show.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid email or password. Please check your credentials.")]
    InvalidCredentials,
    #[error("Account not verified. Please check your email for verification instructions.")]
    Unverified,
    #[error("Email address not found. Please check your email address and try again.")]
    UnknownEmail,
    #[error("Too many requests. Please wait a few minutes before trying again.")]
    RateLimited,
    #[error("Invalid or expired reset token. Please request a new password reset.")]
    InvalidResetToken,
    #[error("Password does not meet requirements. Please choose a stronger password.")]
    WeakPassword,
    #[error("Server error. Please try again later.")]
    Server,
    #[error("Connection timeout. Please check your internet connection and try again.")]
    Connectivity,
    #[error("No access token received")]
    MissingToken,
    #[error("{0}")]
    ExternalIdentity(String),
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Register,
    Login,
    External,
    ForgotPassword,
    ResetPassword,
}

impl Flow {
    fn fallback_message(self) -> &'static str {
        match self {
            Flow::Register => "Registration failed. Please try again.",
            Flow::Login => "Login failed. Please try again.",
            Flow::External => "Google Sign-In failed. Please try again.",
            Flow::ForgotPassword => "Failed to send reset email. Please try again.",
            Flow::ResetPassword => "Failed to reset password. Please try again.",
        }
    }
}

/// Map a transport/HTTP failure to the message shown for `flow`.
fn classify(flow: Flow, err: &ApiError) -> AuthError {
    if err.is_connectivity() {
        return AuthError::Connectivity;
    }
    match (flow, err.status()) {
        (Flow::Login | Flow::External, Some(401)) => AuthError::InvalidCredentials,
        (Flow::Login | Flow::External, Some(403)) => AuthError::Unverified,
        (Flow::ForgotPassword, Some(404)) => AuthError::UnknownEmail,
        (Flow::ForgotPassword, Some(429)) => AuthError::RateLimited,
        (Flow::ResetPassword, Some(400)) => AuthError::InvalidResetToken,
        (Flow::ResetPassword, Some(422)) => AuthError::WeakPassword,
        // Registration shows whatever the server said, even for 5xx.
        (flow, Some(status)) if status >= 500 && flow != Flow::Register => AuthError::Server,
        _ => AuthError::Rejected(
            err.server_message()
                .unwrap_or_else(|| flow.fallback_message().to_string()),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
}

/// Snapshot of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<User>,
    pub authenticated: bool,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub message: String,
    pub email_sent: bool,
    /// Whether the automatic login that follows registration produced a token.
    pub signed_in: bool,
}

#[derive(Debug, Default, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    user: Option<User>,
    authenticated: bool,
    palette: Palette,
}

/// Owns the signed-in user and drives every authentication flow.
#[derive(Clone)]
pub struct AuthSession {
    tokens: TokenStore,
    storage: SharedStore,
    identity: Option<Arc<dyn IdentityProvider>>,
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl AuthSession {
    pub fn new(tokens: TokenStore, storage: SharedStore) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            tokens,
            storage,
            identity: None,
            state: Arc::new(RwLock::new(SessionState::default())),
            events,
        }
    }

    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Session {
        let state = self.state.read().ok();
        Session {
            token: self.tokens.get(),
            user: state.as_ref().and_then(|s| s.user.clone()),
            authenticated: state.as_ref().map(|s| s.authenticated).unwrap_or(false),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().map(|s| s.authenticated).unwrap_or(false)
    }

    pub fn user(&self) -> Option<User> {
        self.state.read().ok().and_then(|s| s.user.clone())
    }

    pub fn palette(&self) -> Palette {
        self.state
            .read()
            .map(|s| s.palette.clone())
            .unwrap_or_default()
    }

    pub fn set_palette(&self, palette: Palette) {
        storage::save(self.storage.as_ref(), KEY_PALETTE, &palette);
        if let Ok(mut state) = self.state.write() {
            state.palette = palette;
        }
    }

    /// Restore palette, cached user and token from durable storage, then
    /// validate the token against the backend.
    pub async fn hydrate(&self) -> Session {
        let palette = storage::load::<Palette>(self.storage.as_ref(), KEY_PALETTE);
        let cached_user = storage::load::<User>(self.storage.as_ref(), KEY_USER);

        if let Ok(mut state) = self.state.write() {
            if let Some(palette) = palette {
                state.palette = palette;
            }
            if let Some(user) = cached_user.clone() {
                state.user = Some(user);
                state.authenticated = true;
            }
        }

        // In-memory token first, then the durable one; either gets validated.
        let Some(token) = self.tokens.resolve() else {
            tracing::debug!("session: no stored token");
            return self.session();
        };

        match self.tokens.api().get_json::<Value>(VALIDATE_PATH).await {
            Ok(me) => {
                let fallback = cached_user
                    .as_ref()
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|| "You".to_string());
                match User::decode(&me, &fallback) {
                    Ok(mut user) => {
                        user.token = Some(token);
                        self.store_user(user);
                    }
                    Err(e) => tracing::warn!("session: unexpected profile payload: {}", e),
                }
                self.set_authenticated(true);
                tracing::info!("session: token validated");
                self.emit(SessionEvent::SignedIn);
            }
            Err(e) => {
                tracing::warn!("session: token validation failed: {}", e);
                self.tokens.set(None);
                self.set_authenticated(false);
            }
        }

        self.session()
    }

    /// Create an account, then sign in with the same credentials.
    ///
    /// The session is marked authenticated as soon as the account exists, even
    /// if the follow-up login does not yield a token.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<Registration, AuthError> {
        let trimmed_email = email.trim();
        if trimmed_email.is_empty() {
            return Err(AuthError::Validation("Please enter your email address.".to_string()));
        }
        if password.is_empty() {
            return Err(AuthError::Validation("Please enter a password.".to_string()));
        }

        let request = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: RegisterResponse = self
            .tokens
            .api()
            .post_json(REGISTER_PATH, &request)
            .await
            .map_err(|e| {
                tracing::warn!("session: registration failed: {}", e);
                classify(Flow::Register, &e)
            })?;

        let trimmed_name = name.trim();
        let mut user = User {
            id: response.user_id,
            name: if trimmed_name.is_empty() { "You".to_string() } else { trimmed_name.to_string() },
            email: Some(trimmed_email.to_string()),
            photo: None,
            token: None,
        };
        // The new account must never ride on a previous account's token.
        let replaced_token = self.tokens.get().is_some();
        self.tokens.set(None);
        self.store_user(user.clone());
        self.set_authenticated(true);
        tracing::info!("session: account created");
        if replaced_token {
            self.emit(SessionEvent::SignedOut);
        }

        let signed_in = match self.request_token(email, password).await {
            Ok(token) => {
                self.tokens.set(Some(token.clone()));
                user.token = Some(token);
                self.store_user(user);
                self.emit(SessionEvent::SignedIn);
                true
            }
            Err(e) => {
                tracing::warn!("session: auto-login after registration failed, user can login manually: {}", e);
                false
            }
        };

        Ok(Registration {
            message: response
                .message
                .unwrap_or_else(|| "Registration successful!".to_string()),
            email_sent: response.email_sent,
            signed_in,
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let token = self.request_token(email, password).await?;

        self.tokens.set(Some(token.clone()));
        self.set_authenticated(true);
        tracing::info!("session: login successful");
        self.emit(SessionEvent::SignedIn);

        let fallback = User {
            id: None,
            name: email.to_string(),
            email: Some(email.to_string()),
            photo: None,
            token: None,
        };
        let mut user = match self.tokens.api().get_json::<Value>(PROFILE_PATH).await {
            Ok(profile) => User::decode(&profile, email).unwrap_or_else(|e| {
                tracing::warn!("session: unexpected profile payload: {}", e);
                fallback.clone()
            }),
            Err(e) => {
                tracing::warn!("session: profile fetch failed, using email as name: {}", e);
                fallback.clone()
            }
        };
        if user.email.is_none() {
            user.email = fallback.email;
        }
        user.token = Some(token);
        self.store_user(user);

        Ok(self.session())
    }

    /// Sign in through the platform identity provider.
    ///
    /// `Ok(None)` means the user cancelled. Any failure signs out of the
    /// provider before the error is returned.
    pub async fn login_with_external_identity(&self) -> Result<Option<Session>, AuthError> {
        let Some(provider) = self.identity.clone() else {
            return Err(AuthError::ExternalIdentity(
                "Google Sign-In is not available on this device".to_string(),
            ));
        };

        match self.external_login(provider.as_ref()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                tracing::warn!("session: external sign-in failed: {}", e);
                if let Err(sign_out) = provider.sign_out().await {
                    tracing::error!("session: failed to sign out of identity provider: {}", sign_out);
                }
                Err(e)
            }
        }
    }

    async fn external_login(&self, provider: &dyn IdentityProvider) -> Result<Option<Session>, AuthError> {
        if !provider.is_available().await {
            return Err(AuthError::ExternalIdentity(
                "Google Sign-In is not available on this device".to_string(),
            ));
        }

        let identity = match provider.sign_in().await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                tracing::info!("session: external sign-in cancelled by user");
                return Ok(None);
            }
            Err(e) => return Err(AuthError::ExternalIdentity(e)),
        };

        let request = ExternalLoginRequest {
            id_token: identity.id_token.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            photo: identity.photo.clone(),
            server_auth_code: identity.server_auth_code.clone(),
        };
        let response: TokenResponse = self
            .tokens
            .api()
            .post_json(EXTERNAL_LOGIN_PATH, &request)
            .await
            .map_err(|e| classify(Flow::External, &e))?;

        let token = response
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingToken)?;

        let user = merge_external_user(response.user.as_ref(), &identity, token.clone());
        self.tokens.set(Some(token));
        self.store_user(user);
        self.set_authenticated(true);
        tracing::info!("session: external sign-in completed");
        self.emit(SessionEvent::SignedIn);

        Ok(Some(self.session()))
    }

    /// Ask the backend to email a reset link. Returns the server's message.
    pub async fn forgot_password(&self, email: &str) -> Result<String, AuthError> {
        let request = ForgotPasswordRequest {
            email: email.trim().to_string(),
        };
        let response: Option<MessageResponse> = self
            .tokens
            .api()
            .post_json(FORGOT_PASSWORD_PATH, &request)
            .await
            .map_err(|e| classify(Flow::ForgotPassword, &e))?;

        Ok(response
            .and_then(|r| r.message)
            .unwrap_or_else(|| "Password reset email sent".to_string()))
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<String, AuthError> {
        let request = ResetPasswordRequest {
            token: token.to_string(),
            password: new_password.to_string(),
        };
        let response: Option<MessageResponse> = self
            .tokens
            .api()
            .post_json(RESET_PASSWORD_PATH, &request)
            .await
            .map_err(|e| classify(Flow::ResetPassword, &e))?;

        Ok(response
            .and_then(|r| r.message)
            .unwrap_or_else(|| "Password reset successfully".to_string()))
    }

    /// Clear the token, the cached user and stored credentials.
    pub fn logout(&self) {
        self.tokens.set(None);
        storage::remove(self.storage.as_ref(), KEY_USER);
        storage::remove(self.storage.as_ref(), KEY_CREDENTIALS);
        if let Ok(mut state) = self.state.write() {
            state.user = None;
            state.authenticated = false;
        }
        tracing::info!("session: logged out");
        self.emit(SessionEvent::SignedOut);
    }

    async fn request_token(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: TokenResponse = self
            .tokens
            .api()
            .post_json(LOGIN_PATH, &request)
            .await
            .map_err(|e| {
                tracing::warn!("session: login request failed: {}", e);
                classify(Flow::Login, &e)
            })?;

        response
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingToken)
    }

    fn store_user(&self, user: User) {
        storage::save(self.storage.as_ref(), KEY_USER, &user);
        if let Ok(mut state) = self.state.write() {
            state.user = Some(user);
        }
    }

    fn set_authenticated(&self, authenticated: bool) {
        if let Ok(mut state) = self.state.write() {
            state.authenticated = authenticated;
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Server fields win; the provider's identity fills the gaps.
fn merge_external_user(server_user: Option<&Value>, identity: &ExternalIdentity, token: String) -> User {
    let server = server_user.and_then(|value| User::decode(value, &identity.name).ok());
    User {
        id: server
            .as_ref()
            .and_then(|u| u.id.clone())
            .or_else(|| Some(identity.id.clone())),
        name: server
            .as_ref()
            .map(|u| u.name.clone())
            .unwrap_or_else(|| identity.name.clone()),
        email: server
            .as_ref()
            .and_then(|u| u.email.clone())
            .or_else(|| Some(identity.email.clone())),
        photo: identity
            .photo
            .as_ref()
            .map(|p| format!("data:image/jpeg;base64,{p}")),
        token: Some(token),
    }
}

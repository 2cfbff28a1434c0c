mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use adhders_client::storage::{self, KEY_CREDENTIALS, KEY_TOKEN, KEY_USER};
use adhders_client::{AuthError, AuthSession, ExternalIdentity, IdentityProvider, SessionEvent};
use adhders_shared::{Palette, User};
use async_trait::async_trait;
use common::{Backend, PASSWORD, TOKEN};

fn session_for(backend: &Backend) -> (AuthSession, adhders_client::storage::SharedStore) {
    let (tokens, storage) = backend.tokens();
    (AuthSession::new(tokens, storage.clone()), storage)
}

#[tokio::test]
async fn login_sets_token_and_enriches_user() {
    let backend = Backend::start().await;
    let (session, storage) = session_for(&backend);
    let mut events = session.subscribe();

    let state = session.login("ada@example.com", PASSWORD).await.unwrap();

    assert!(state.authenticated);
    assert_eq!(state.token.as_deref(), Some(TOKEN));
    let user = state.user.unwrap();
    assert_eq!(user.name, "Ada");
    assert_eq!(user.token.as_deref(), Some(TOKEN));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);

    assert_eq!(storage::load::<String>(storage.as_ref(), KEY_TOKEN).as_deref(), Some(TOKEN));
    let cached: User = storage::load(storage.as_ref(), KEY_USER).unwrap();
    assert_eq!(cached.id.as_deref(), Some("u-1"));

    // the profile call already carried the new bearer token
    let profile = backend
        .requests()
        .into_iter()
        .find(|r| r.path == "/api/auth/me")
        .unwrap();
    assert_eq!(profile.authorization, Some(format!("Bearer {TOKEN}")));
}

#[tokio::test]
async fn failed_login_leaves_prior_session_untouched() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);
    session.login("ada@example.com", PASSWORD).await.unwrap();
    let before = session.session();

    let err = session.login("ada@example.com", "wrong").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
    assert_eq!(
        err.to_string(),
        "Invalid email or password. Please check your credentials."
    );
    assert_eq!(session.session(), before);
}

#[tokio::test]
async fn login_error_mapping() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);

    assert_eq!(
        session.login("unverified@example.com", PASSWORD).await.unwrap_err(),
        AuthError::Unverified
    );
    assert_eq!(
        session.login("broken@example.com", PASSWORD).await.unwrap_err(),
        AuthError::Server
    );
    assert_eq!(
        session.login("no-token@example.com", PASSWORD).await.unwrap_err(),
        AuthError::MissingToken
    );
    assert!(!session.is_authenticated());
    assert_eq!(session.session().token, None);
}

#[tokio::test]
async fn unreachable_backend_is_a_connectivity_error() {
    // Nothing listens on port 9 locally.
    let api = adhders_client::ApiClient::new("http://127.0.0.1:9", std::time::Duration::from_secs(2)).unwrap();
    let storage: adhders_client::storage::SharedStore = Arc::new(adhders_client::storage::MemoryStore::new());
    let session = AuthSession::new(adhders_client::TokenStore::new(api, storage.clone()), storage);

    assert_eq!(
        session.login("ada@example.com", PASSWORD).await.unwrap_err(),
        AuthError::Connectivity
    );
}

#[tokio::test]
async fn register_then_auto_login_stores_token_on_user() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);
    let mut events = session.subscribe();

    let outcome = session.register("  Ada  ", "ada@example.com ", PASSWORD).await.unwrap();

    assert!(outcome.signed_in);
    assert!(outcome.email_sent);
    assert_eq!(outcome.message, "Registration successful! Please check your email.");

    let state = session.session();
    assert!(state.authenticated);
    assert_eq!(state.token.as_deref(), Some(TOKEN));
    let user = state.user.unwrap();
    assert_eq!(user.name, "Ada");
    assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    assert_eq!(user.id.as_deref(), Some("u-new"));
    assert_eq!(user.token.as_deref(), Some(TOKEN));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
}

#[tokio::test]
async fn register_with_failed_auto_login_stays_authenticated_without_token() {
    let backend = Backend::start().await;
    let (session, storage) = session_for(&backend);
    let mut events = session.subscribe();

    let outcome = session.register("", "new@example.com", "not-the-password").await.unwrap();

    assert!(!outcome.signed_in);
    let state = session.session();
    assert!(state.authenticated);
    assert_eq!(state.token, None);
    let user = state.user.unwrap();
    assert_eq!(user.name, "You");
    assert_eq!(user.token, None);
    assert!(storage::load::<User>(storage.as_ref(), KEY_USER).is_some());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn register_over_existing_login_drops_the_old_token() {
    let backend = Backend::start().await;
    let (session, storage) = session_for(&backend);
    session.login("ada@example.com", PASSWORD).await.unwrap();
    let mut events = session.subscribe();

    let outcome = session
        .register("Bea", "new@example.com", "not-the-password")
        .await
        .unwrap();

    assert!(!outcome.signed_in);
    let state = session.session();
    assert!(state.authenticated);
    assert_eq!(state.token, None);
    assert_eq!(state.user.unwrap().email.as_deref(), Some("new@example.com"));
    assert_eq!(storage::load::<String>(storage.as_ref(), KEY_TOKEN), None);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
    assert!(events.try_recv().is_err());

    // the auto-login attempt went out without the previous bearer
    let auto_login = backend
        .requests()
        .into_iter()
        .filter(|r| r.path == "/api/auth/login")
        .last()
        .unwrap();
    assert_eq!(auto_login.authorization, None);
}

#[tokio::test]
async fn register_validates_before_any_request() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);

    assert!(matches!(
        session.register("Ada", "   ", PASSWORD).await,
        Err(AuthError::Validation(_))
    ));
    assert!(matches!(
        session.register("Ada", "ada@example.com", "").await,
        Err(AuthError::Validation(_))
    ));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn register_rejection_passes_server_detail_through() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);

    let err = session.register("Ada", "taken@example.com", PASSWORD).await.unwrap_err();
    assert_eq!(err.to_string(), "Email already registered");
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn hydrate_validates_stored_token() {
    let backend = Backend::start().await;
    let (session, storage) = session_for(&backend);
    storage::save(storage.as_ref(), KEY_TOKEN, &TOKEN);
    storage::save(storage.as_ref(), adhders_client::storage::KEY_PALETTE, &Palette {
        primary: "#000000".into(),
        secondary: "#111111".into(),
        accent: "#222222".into(),
    });
    let mut events = session.subscribe();

    let state = session.hydrate().await;

    assert!(state.authenticated);
    assert_eq!(state.token.as_deref(), Some(TOKEN));
    assert_eq!(state.user.unwrap().name, "Ada");
    assert_eq!(session.palette().primary, "#000000");
    assert_eq!(backend.hits("GET", "/api/me"), 1);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
}

#[tokio::test]
async fn hydrate_validates_token_already_in_memory() {
    let backend = Backend::start().await;
    let (tokens, storage) = backend.tokens();
    tokens.set(Some(TOKEN.to_string()));
    let session = AuthSession::new(tokens, storage);
    let mut events = session.subscribe();

    let state = session.hydrate().await;

    assert!(state.authenticated);
    assert_eq!(state.user.unwrap().name, "Ada");
    assert_eq!(backend.hits("GET", "/api/me"), 1);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
}

#[tokio::test]
async fn hydrate_clears_rejected_token() {
    let backend = Backend::start().await;
    let (session, storage) = session_for(&backend);
    storage::save(storage.as_ref(), KEY_TOKEN, &"expired-token");
    storage::save(storage.as_ref(), KEY_USER, &User {
        id: Some("u-1".into()),
        name: "Ada".into(),
        email: None,
        photo: None,
        token: Some("expired-token".into()),
    });

    let state = session.hydrate().await;

    assert!(!state.authenticated);
    assert_eq!(state.token, None);
    assert_eq!(storage::load::<String>(storage.as_ref(), KEY_TOKEN), None);
}

#[tokio::test]
async fn hydrate_without_token_makes_no_request() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);

    let state = session.hydrate().await;

    assert!(!state.authenticated);
    assert_eq!(session.palette(), Palette::default());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn logout_clears_everything() {
    let backend = Backend::start().await;
    let (session, storage) = session_for(&backend);
    session.login("ada@example.com", PASSWORD).await.unwrap();
    storage::save(storage.as_ref(), KEY_CREDENTIALS, &"legacy");
    let mut events = session.subscribe();

    session.logout();

    let state = session.session();
    assert!(!state.authenticated);
    assert_eq!(state.token, None);
    assert_eq!(state.user, None);
    assert_eq!(storage::load::<String>(storage.as_ref(), KEY_TOKEN), None);
    assert!(storage::load::<User>(storage.as_ref(), KEY_USER).is_none());
    assert_eq!(storage::load::<String>(storage.as_ref(), KEY_CREDENTIALS), None);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
}

#[tokio::test]
async fn password_reset_flows() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);

    assert_eq!(
        session.forgot_password("ada@example.com").await.unwrap(),
        "Password reset email sent"
    );
    assert_eq!(
        session.forgot_password("nobody@example.com").await.unwrap_err(),
        AuthError::UnknownEmail
    );
    assert_eq!(
        session.forgot_password("spam@example.com").await.unwrap_err(),
        AuthError::RateLimited
    );

    assert_eq!(
        session.reset_password("good", "long-enough").await.unwrap(),
        "Password has been reset"
    );
    assert_eq!(
        session.reset_password("expired", "long-enough").await.unwrap_err(),
        AuthError::InvalidResetToken
    );
    assert_eq!(
        session.reset_password("good", "123").await.unwrap_err(),
        AuthError::WeakPassword
    );
    assert!(!session.is_authenticated());
}

struct FakeProvider {
    available: bool,
    identity: Option<ExternalIdentity>,
    signed_out: AtomicBool,
}

impl FakeProvider {
    fn new(id_token: &str) -> Self {
        Self {
            available: true,
            identity: Some(ExternalIdentity {
                id: "g-1".into(),
                name: "Gee".into(),
                email: "gee@example.com".into(),
                photo: Some("QUJD".into()),
                id_token: id_token.into(),
                server_auth_code: Some("code".into()),
            }),
            signed_out: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn sign_in(&self) -> Result<Option<ExternalIdentity>, String> {
        Ok(self.identity.clone())
    }

    async fn sign_out(&self) -> Result<(), String> {
        self.signed_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn external_identity_login() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);
    let provider = Arc::new(FakeProvider::new("valid"));
    let session = session.with_identity_provider(provider.clone());

    let state = session.login_with_external_identity().await.unwrap().unwrap();

    assert!(state.authenticated);
    assert_eq!(state.token.as_deref(), Some(TOKEN));
    let user = state.user.unwrap();
    assert_eq!(user.id.as_deref(), Some("u-g"));
    assert_eq!(user.name, "Server Gee");
    assert_eq!(user.email.as_deref(), Some("gee@example.com"));
    assert_eq!(user.photo.as_deref(), Some("data:image/jpeg;base64,QUJD"));
    assert!(!provider.signed_out.load(Ordering::SeqCst));
}

#[tokio::test]
async fn external_identity_failure_signs_out_of_provider() {
    let backend = Backend::start().await;
    let (session, _storage) = session_for(&backend);
    let provider = Arc::new(FakeProvider::new("forged"));
    let session = session.with_identity_provider(provider.clone());

    let err = session.login_with_external_identity().await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
    assert!(provider.signed_out.load(Ordering::SeqCst));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn external_identity_cancel_and_unavailable() {
    let backend = Backend::start().await;

    let (session, _storage) = session_for(&backend);
    let cancelled = Arc::new(FakeProvider {
        identity: None,
        ..FakeProvider::new("valid")
    });
    let session = session.with_identity_provider(cancelled);
    assert_eq!(session.login_with_external_identity().await.unwrap(), None);

    let (session, _storage) = session_for(&backend);
    let unavailable = Arc::new(FakeProvider {
        available: false,
        ..FakeProvider::new("valid")
    });
    let session = session.with_identity_provider(unavailable.clone());
    assert!(matches!(
        session.login_with_external_identity().await,
        Err(AuthError::ExternalIdentity(_))
    ));
    assert!(unavailable.signed_out.load(Ordering::SeqCst));

    let (session, _storage) = session_for(&backend);
    assert!(matches!(
        session.login_with_external_identity().await,
        Err(AuthError::ExternalIdentity(_))
    ));
    assert_eq!(backend.hits("POST", "/api/auth/google"), 0);
}

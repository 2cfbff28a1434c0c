//! Platform identity provider seam (e.g. a native "Sign in with Google" SDK).

use async_trait::async_trait;

/// Identity returned by the platform provider after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Base64-encoded JPEG, if the provider exposes a profile picture.
    pub photo: Option<String>,
    pub id_token: String,
    pub server_auth_code: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether the provider can be used on this device.
    async fn is_available(&self) -> bool;

    /// Run the provider's sign-in flow. `Ok(None)` means the user cancelled.
    async fn sign_in(&self) -> Result<Option<ExternalIdentity>, String>;

    /// End the provider-side session.
    async fn sign_out(&self) -> Result<(), String>;
}

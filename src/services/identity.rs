use async_trait::async_trait;

use crate::error::Result;
use crate::models::user::ExternalIdentity;

/// Verifies tokens issued by an external identity provider (Google sign-in).
///
/// Implementations check the token's signature, issuer and audience
/// against the provider.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Returns the identity the provider vouches for.
    ///
    /// # Errors
    ///
    /// `IdentityInvalid` when the token is rejected or the provider is unreachable.
    async fn verify(&self, external_token: &str) -> Result<ExternalIdentity>;
}

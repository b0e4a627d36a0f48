// Credential resolution seam. Encrypted credential storage and decryption
// belong to an external collaborator; the core only receives a decrypted,
// platform-ready handle and never persists it.

use crate::errors::CredentialError;
use crate::models::{DestinationAccount, PlatformCredential};
use async_trait::async_trait;

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve a decrypted credential for the account. Fails when the stored
    /// credential is missing, expired, or revoked.
    async fn resolve(
        &self,
        account: &DestinationAccount,
    ) -> Result<PlatformCredential, CredentialError>;
}

/// Resolver reading decrypted tokens from the process environment, keyed by
/// `{PLATFORM}_TOKEN_{EXTERNAL_ACCOUNT_ID}`. Stands in for the external
/// decryption service in single-node deployments and local runs.
pub struct EnvCredentialResolver;

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self
    }

    fn var_name(account: &DestinationAccount) -> String {
        format!(
            "{}_TOKEN_{}",
            account.platform.to_string().to_uppercase(),
            account.external_account_id.to_uppercase()
        )
    }
}

impl Default for EnvCredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(
        &self,
        account: &DestinationAccount,
    ) -> Result<PlatformCredential, CredentialError> {
        let var = Self::var_name(account);
        match std::env::var(&var) {
            Ok(token) if !token.is_empty() => Ok(PlatformCredential {
                access_token: token,
                external_account_id: account.external_account_id.clone(),
            }),
            Ok(_) => Err(CredentialError::ExpiredOrRevoked(
                account.external_account_id.clone(),
            )),
            Err(_) => Err(CredentialError::NotFound(account.external_account_id.clone())),
        }
    }
}

//! Access-token retrieval.

use async_trait::async_trait;
use nimbus_core::Result;

/// Supplies the current access token.
///
/// Called once per connect and again whenever the remote announces that the
/// token is about to expire.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current (possibly refreshed) token.
    async fn get_token(&self) -> Result<String>;
}

/// A fixed token.
#[derive(Clone, Debug)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn get_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

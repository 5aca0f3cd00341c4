use async_trait::async_trait;
use tracediary_remote::{ContentStoreClient, RepoRef, StoreConfig, StoreResult};

/// Confirms that a token can reach a repository.
#[async_trait]
pub trait RepoAccessValidator: Send + Sync {
    async fn validate(&self, repo: &RepoRef, token: &str) -> StoreResult<()>;
}

/// Validates against the contents API.
pub struct HttpRepoValidator {
    config: StoreConfig,
}

impl HttpRepoValidator {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RepoAccessValidator for HttpRepoValidator {
    async fn validate(&self, repo: &RepoRef, token: &str) -> StoreResult<()> {
        let client = ContentStoreClient::new(self.config.clone(), repo.clone(), token, None)?;
        client.validate_access().await
    }
}

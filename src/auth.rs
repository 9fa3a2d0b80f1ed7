//! Authentication strategies for the two backends.
//!
//! The key-based consumer service needs no credential exchange: the key is a
//! static header installed at client construction. The IAM-authenticated
//! service exchanges caller-supplied credentials for a bearer token, fetched
//! lazily on first use and cached for the client's lifetime.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::errors::Error;

/// Header carrying the API key on the consumer backend.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Source of IAM access tokens.
///
/// Implementations wrap whatever credential machinery the application uses
/// (application-default credentials, workload identity, a test stub). The
/// fetch must be idempotent: a race on first use may trigger a duplicate
/// fetch, which is tolerated.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns an access token scoped to the cloud platform.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the credential exchange fails.
    async fn access_token(&self) -> Result<String, Error>;
}

/// How a request is authenticated.
pub enum AuthStrategy {
    /// Static API key, embedded as a header at construction time.
    ApiKey(String),
    /// IAM credential exchange; the token is cached after first fetch.
    Iam {
        provider: Arc<dyn TokenProvider>,
        token: OnceCell<String>,
    },
}

impl AuthStrategy {
    /// Creates an IAM strategy with an empty token cache.
    #[must_use]
    pub fn iam(provider: Arc<dyn TokenProvider>) -> Self {
        Self::Iam {
            provider,
            token: OnceCell::new(),
        }
    }

    /// Returns the bearer token to attach, fetching and caching it on first
    /// use. `None` for the API-key strategy, whose key already lives in the
    /// static header map.
    pub(crate) async fn bearer_token(&self) -> Result<Option<String>, Error> {
        match self {
            Self::ApiKey(_) => Ok(None),
            Self::Iam { provider, token } => {
                let token = token
                    .get_or_try_init(|| async {
                        log::debug!("fetching IAM access token");
                        provider.access_token().await
                    })
                    .await?;
                Ok(Some(token.clone()))
            }
        }
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("AuthStrategy::ApiKey(..)"),
            Self::Iam { token, .. } => f
                .debug_struct("AuthStrategy::Iam")
                .field("cached", &token.initialized())
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn access_token(&self) -> Result<String, Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok("token-abc".to_string())
        }
    }

    #[tokio::test]
    async fn api_key_strategy_has_no_bearer() {
        let auth = AuthStrategy::ApiKey("key".to_string());
        assert_eq!(auth.bearer_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn iam_token_fetched_once_and_cached() {
        let provider = Arc::new(CountingProvider {
            fetches: AtomicUsize::new(0),
        });
        let auth = AuthStrategy::iam(provider.clone());

        assert_eq!(
            auth.bearer_token().await.unwrap().as_deref(),
            Some("token-abc")
        );
        assert_eq!(
            auth.bearer_token().await.unwrap().as_deref(),
            Some("token-abc")
        );
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn iam_fetch_error_propagates() {
        struct FailingProvider;

        #[async_trait]
        impl TokenProvider for FailingProvider {
            async fn access_token(&self) -> Result<String, Error> {
                Err(Error::Auth("no default credentials".to_string()))
            }
        }

        let auth = AuthStrategy::iam(Arc::new(FailingProvider));
        let err = auth.bearer_token().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}

//! Single-flight token refresh

use std::{fmt, sync::Arc};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest_middleware::ClientWithMiddleware;
use tessera_clock::Clock;
use tessera_tokens::{AccessToken, RefreshError, Token};
use tokio::sync::Mutex;

type RefreshOutcome = Result<AccessToken, Arc<RefreshError>>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Ensures that at most one refresh is in flight at a time
///
/// Every caller of [`ensure_fresh()`][Self::ensure_fresh()] that arrives
/// while a refresh is underway waits on that same refresh and observes the
/// same outcome, success or failure. Once the refresh settles, the next
/// caller decides afresh whether another refresh is needed.
///
/// Clones share the in-flight slot.
#[derive(Clone, Default)]
pub struct RefreshCoordinator {
    pending: Arc<Mutex<Option<PendingRefresh>>>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self.pending.try_lock() {
            Ok(slot) if slot.is_some() => "refreshing",
            Ok(_) => "idle",
            Err(_) => "busy",
        };

        f.debug_struct("RefreshCoordinator")
            .field("state", &state)
            .finish()
    }
}

impl RefreshCoordinator {
    /// Constructs an idle coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently in flight
    pub async fn is_refreshing(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    /// Refreshes the token if needed, joining any refresh already in flight
    ///
    /// Resolves to the current raw token, which is the newly refreshed token
    /// if a refresh happened. When no refresh is needed, no network activity
    /// takes place.
    ///
    /// # Errors
    ///
    /// Every caller waiting on a refresh that fails receives the same
    /// shared error. The token has been cleared by then.
    pub async fn ensure_fresh<C>(
        &self,
        token: &Arc<Token<C>>,
        transport: &ClientWithMiddleware,
    ) -> Result<Option<AccessToken>, Arc<RefreshError>>
    where
        C: Clock + Send + Sync + 'static,
    {
        let pending = {
            let mut slot = self.pending.lock().await;

            if let Some(pending) = &*slot {
                tracing::trace!("joining token refresh already in flight");
                pending.clone()
            } else if token.should_refresh().await {
                tracing::debug!(storage.key = %token.storage_key(), "starting token refresh");
                let pending = self.start(Arc::clone(token), transport.clone());
                *slot = Some(pending.clone());
                pending
            } else {
                drop(slot);
                return Ok(token.get_token().await);
            }
        };

        pending.await.map(Some)
    }

    fn start<C>(&self, token: Arc<Token<C>>, transport: ClientWithMiddleware) -> PendingRefresh
    where
        C: Clock + Send + Sync + 'static,
    {
        let slot = Arc::clone(&self.pending);

        async move {
            let outcome = token.refresh(&transport).await.map_err(Arc::new);
            slot.lock().await.take();
            outcome
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use reqwest_middleware::ClientBuilder;
    use serde_json::json;
    use tessera_clock::{DurationSecs, TestClock, UnixTime};
    use tessera_tokens::storage::MemoryStorage;

    use super::*;
    use crate::test_util::{config, jwt, StubServer};

    async fn setup(
        now: u64,
        server: &Arc<StubServer>,
    ) -> (Arc<Token<TestClock>>, TestClock, ClientWithMiddleware) {
        let clock = TestClock::new(UnixTime(now));
        let token = Token::builder(config(), Arc::new(MemoryStorage::new()))
            .with_clock(clock.clone())
            .build()
            .await;

        let transport = ClientBuilder::new(reqwest::Client::default())
            .with_arc(server.clone())
            .build();

        (Arc::new(token), clock, transport)
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_network_activity() -> Result<()> {
        let server = StubServer::new();
        let (token, _, transport) = setup(950, &server).await;
        let raw = jwt(900, 1000);
        token.set_token(raw.as_str()).await?;

        let coordinator = RefreshCoordinator::new();
        let first = coordinator.ensure_fresh(&token, &transport).await?;
        let second = coordinator.ensure_fresh(&token, &transport).await?;

        assert_eq!(first, Some(raw.clone()));
        assert_eq!(second, Some(raw));
        assert_eq!(server.refresh_calls(), 0);
        assert!(server.requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn absent_token_resolves_to_none() -> Result<()> {
        let server = StubServer::new();
        let (token, _, transport) = setup(950, &server).await;

        let current = RefreshCoordinator::new()
            .ensure_fresh(&token, &transport)
            .await?;

        assert_eq!(current, None);
        assert_eq!(server.refresh_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_beyond_refresh_window_is_not_refreshed() -> Result<()> {
        let server = StubServer::new();
        let (token, _, transport) = setup(1100, &server).await;
        token.set_token(jwt(900, 1000).as_str()).await?;

        RefreshCoordinator::new()
            .ensure_fresh(&token, &transport)
            .await?;

        assert_eq!(server.refresh_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() -> Result<()> {
        let fresh = jwt(1050, 2000);
        let server = StubServer::new()
            .with_refresh_response(200, json!({ "data": { "access_token": fresh.as_str() } }));
        let (token, _, transport) = setup(1050, &server).await;
        token.set_token(jwt(900, 1000).as_str()).await?;

        let coordinator = RefreshCoordinator::new();
        let results = futures::future::join_all(
            (0..5).map(|_| coordinator.ensure_fresh(&token, &transport)),
        )
        .await;

        assert_eq!(server.refresh_calls(), 1);
        for result in results {
            assert_eq!(result?, Some(fresh.clone()));
        }
        assert!(!coordinator.is_refreshing().await);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() -> Result<()> {
        let server = StubServer::new().with_refresh_response(401, json!({ "error": "revoked" }));
        let (token, _, transport) = setup(1050, &server).await;
        token.set_token(jwt(900, 1000).as_str()).await?;

        let coordinator = RefreshCoordinator::new();
        let results = futures::future::join_all(
            (0..3).map(|_| coordinator.ensure_fresh(&token, &transport)),
        )
        .await;

        assert_eq!(server.refresh_calls(), 1);
        let errors: Vec<_> = results.into_iter().filter_map(|r| r.err()).collect();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
        assert!(matches!(*errors[0], RefreshError::ErrorWithBody { .. }));

        assert_eq!(token.get_token().await, None);
        assert!(token.claims().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn settled_refresh_does_not_block_the_next_one() -> Result<()> {
        let server = StubServer::new();
        let (token, clock, transport) = setup(1050, &server).await;
        token.set_token(jwt(900, 1000).as_str()).await?;

        server.set_refresh_token(&jwt(1050, 1100));
        let coordinator = RefreshCoordinator::new();
        coordinator.ensure_fresh(&token, &transport).await?;
        assert_eq!(server.refresh_calls(), 1);

        clock.advance(DurationSecs(60));
        server.set_refresh_token(&jwt(1110, 1200));
        let current = coordinator.ensure_fresh(&token, &transport).await?;

        assert_eq!(server.refresh_calls(), 2);
        assert_eq!(current, Some(jwt(1110, 1200)));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn spawned_callers_share_one_refresh() -> Result<()> {
        let fresh = jwt(1050, 2000);
        let server = StubServer::new()
            .with_refresh_response(200, json!({ "data": { "access_token": fresh.as_str() } }));
        let (token, _, transport) = setup(1050, &server).await;
        token.set_token(jwt(900, 1000).as_str()).await?;

        let coordinator = RefreshCoordinator::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                let token = token.clone();
                let transport = transport.clone();
                tokio::spawn(async move { coordinator.ensure_fresh(&token, &transport).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await??, Some(fresh.clone()));
        }
        assert_eq!(server.refresh_calls(), 1);
        Ok(())
    }
}

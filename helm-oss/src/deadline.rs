//! Operation deadline shared by every store call of one command.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{RepoError, RepoResult};

/// Absolute point in time after which store calls give up.
///
/// Copies share the same instant, so a deadline handed to a background task
/// expires together with the command that spawned it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Await `fut`, failing with [`RepoError::DeadlineExceeded`] if the
    /// deadline passes first.
    pub async fn run<T, F>(&self, what: &str, fut: F) -> RepoResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        match self.at {
            None => fut.await,
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| RepoError::DeadlineExceeded(what.to_string()))?,
        }
    }
}

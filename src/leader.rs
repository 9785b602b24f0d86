//! Leader gate: the dispatch loop only runs while this process holds the lock.

use crate::core::Result;
use async_trait::async_trait;

/// An opaque distributed lock.
#[async_trait]
pub trait LeaderGate: Send + Sync {
    /// Block until the lock is held.
    async fn acquire(&self) -> Result<()>;

    /// Resolve once a held lock has been lost.
    async fn lost(&self);
}

/// Single-replica deployments: the lock is always held and never lost.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysLeader;

#[async_trait]
impl LeaderGate for AlwaysLeader {
    async fn acquire(&self) -> Result<()> {
        Ok(())
    }

    async fn lost(&self) {
        std::future::pending::<()>().await
    }
}

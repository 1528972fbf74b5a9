use async_trait::async_trait;

use super::{ListenerError, SyncEvent};

/// In-process consumer of sync events of one or more types.
#[async_trait]
pub trait SyncListener: Send + Sync {
    async fn on_event(&self, event: &SyncEvent) -> Result<(), ListenerError>;
}

/// Adapts a synchronous closure into a [`SyncListener`].
pub struct FnListener<F>(pub F);

#[async_trait]
impl<F> SyncListener for FnListener<F>
where
    F: Fn(&SyncEvent) -> Result<(), ListenerError> + Send + Sync,
{
    async fn on_event(&self, event: &SyncEvent) -> Result<(), ListenerError> {
        (self.0)(event)
    }
}

//! Closure-backed sink

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::{Ack, ReportSink, SinkResult};
use crate::snapshot::Snapshot;

type SendFn = dyn Fn(Snapshot) -> BoxFuture<'static, SinkResult<Ack>> + Send + Sync;

/// Sink delegating to a user-supplied async function.
///
/// ```ignore
/// let sink = FnSink::new("webhook", |snapshot| async move {
///     post_somewhere(&snapshot).await
/// });
/// ```
pub struct FnSink {
    name: String,
    send: Box<SendFn>,
}

impl FnSink {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Snapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SinkResult<Ack>> + Send + 'static,
    {
        Self {
            name: name.into(),
            send: Box::new(move |snapshot| Box::pin(f(snapshot))),
        }
    }
}

impl std::fmt::Debug for FnSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink").field("name", &self.name).finish()
    }
}

#[async_trait]
impl ReportSink for FnSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, snapshot: &Snapshot) -> SinkResult<Ack> {
        (self.send)(snapshot.clone()).await
    }
}

//! Fetcher trait - the caller-supplied data source

use std::future::Future;

use async_trait::async_trait;
use eyre::Result;

/// Source of fresh data for a Coordinator
///
/// The coordinator passes its configured resource identifier on every call.
/// Any async closure `Fn(String) -> impl Future<Output = Result<T>>` is a
/// Fetcher as well.
#[async_trait]
pub trait Fetcher<T>: Send + Sync + 'static {
    /// Fetch the current value for the resource
    async fn fetch(&self, resource_id: &str) -> Result<T>;
}

#[async_trait]
impl<F, Fut, T> Fetcher<T> for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn fetch(&self, resource_id: &str) -> Result<T> {
        (self)(resource_id.to_string()).await
    }
}

//! Remote callers
//!
//! A [`RemoteCaller`] performs one network call for one work item and reports
//! failures as [`Failure`] values carrying classification hints. The batch
//! executor never looks at the network directly.

pub mod http;
pub mod signer;

use crate::executor::Failure;
use async_trait::async_trait;
use std::future::Future;

pub use http::{ApiRequest, HttpCaller, DEFAULT_BASE_URL, NOTE_FEED_PATH};
pub use signer::{CommandSigner, SignRequest, Signer, SignerError, StaticSigner};

/// Performs the remote call for a single work item.
#[async_trait]
pub trait RemoteCaller<I>: Send + Sync {
    /// Value produced by a successful call
    type Output: Send + 'static;

    /// Call the remote service for `item`.
    async fn call(&self, item: &I) -> Result<Self::Output, Failure>;
}

/// Adapter turning an async closure into a [`RemoteCaller`].
///
/// ```
/// use xhs_crawler::executor::Failure;
/// use xhs_crawler::remote::caller_fn;
///
/// let caller = caller_fn(|item: String| async move {
///     if item.is_empty() {
///         Err(Failure::missing_field("id"))
///     } else {
///         Ok(item.len())
///     }
/// });
/// # let _ = caller;
/// ```
#[derive(Debug, Clone)]
pub struct FnCaller<F>(F);

/// Wrap `f` as a [`RemoteCaller`].
pub fn caller_fn<F>(f: F) -> FnCaller<F> {
    FnCaller(f)
}

#[async_trait]
impl<I, T, F, Fut> RemoteCaller<I> for FnCaller<F>
where
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Failure>> + Send,
{
    type Output = T;

    async fn call(&self, item: &I) -> Result<T, Failure> {
        (self.0)(item.clone()).await
    }
}

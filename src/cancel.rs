//! Cancellation tokens observed by background contexts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ScriptError;

/// Shared, monotonic cancellation flag.
///
/// Clones share one flag. Tokens created with [`CancellationToken::child`]
/// carry their own flag and additionally report cancellation once any
/// ancestor is cancelled; cancelling a child never reaches the parent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self { inner: Arc::new(TokenInner { cancelled: AtomicBool::new(false), parent: Some(self.clone()) }) }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        let mut token = Some(self);
        while let Some(current) = token {
            if current.inner.cancelled.load(Ordering::Acquire) {
                return true;
            }
            token = current.inner.parent.as_ref();
        }
        false
    }

    pub fn check(&self) -> Result<(), ScriptError> {
        if self.is_cancelled() {
            Err(ScriptError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn same_token(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

//! Cooperative cancellation for conversion calls.
//!
//! A conversion checks its token between major phases; once the external
//! encoder child has been spawned, cancellation also terminates that process
//! instead of merely abandoning the await.

use crate::error::ConvertError;
use tokio::sync::watch;

/// Sender half. Dropping it without cancelling leaves the token live forever.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation of every associated token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half, cloned into each conversion call.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    /// A token that can never be cancelled.
    pub fn none() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelToken { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Phase boundary check.
    pub fn check(&self) -> Result<(), ConvertError> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested. Pends forever on a token
    /// whose handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_propagates() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(ConvertError::Cancelled)));
        token.cancelled().await; // must resolve immediately
    }

    #[tokio::test]
    async fn test_none_token_never_cancels() {
        let token = CancelToken::none();
        assert!(!token.is_cancelled());
        let pending = token.cancelled();
        tokio::select! {
            _ = pending => panic!("none token resolved"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
    }
}

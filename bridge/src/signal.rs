use tokio::sync::{mpsc, Mutex};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    #[error("session closed")]
    SessionClosed,
}

/// A single-slot, re-armable awaitable.
///
/// Each `wait` suspends the caller until the next `resolve`/`reject`, then
/// the slot re-arms so a subsequent `wait` gets a fresh one. A resolution
/// that fires with no waiter is buffered; later `wait`s drain buffered
/// resolutions one at a time, FIFO. One Signal instance exists per
/// response message type the bridge correlates, so at most one waiter is
/// ever outstanding per instance.
pub struct Signal<T> {
    tx: mpsc::UnboundedSender<Result<T, SignalError>>,
    rx: Mutex<mpsc::UnboundedReceiver<Result<T, SignalError>>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub async fn wait(&self) -> Result<T, SignalError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(SignalError::SessionClosed))
    }

    pub fn resolve(&self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn reject(&self, error: SignalError) {
        let _ = self.tx.send(Err(error));
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn resolves_a_pending_wait() {
        let signal = Arc::new(Signal::new());

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.resolve(7);

        assert_eq!(waiter.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn buffered_resolutions_drain_fifo() {
        // two resolves before any wait: each wait drains exactly one, in order
        let signal = Signal::new();
        signal.resolve(1);
        signal.resolve(2);

        assert_eq!(signal.wait().await, Ok(1));
        assert_eq!(signal.wait().await, Ok(2));
    }

    #[tokio::test]
    async fn rearms_after_each_resolution() {
        let signal = Signal::new();
        for expected in 0..3 {
            signal.resolve(expected);
            assert_eq!(signal.wait().await, Ok(expected));
        }
    }

    #[tokio::test]
    async fn reject_wakes_the_waiter() {
        let signal = Signal::<()>::new();
        signal.reject(SignalError::SessionClosed);
        assert_eq!(signal.wait().await, Err(SignalError::SessionClosed));
    }
}

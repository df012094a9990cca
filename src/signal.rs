//! Run signals: pause and abort requests for one controller run.
//!
//! A [`RunSignal`] is created per run and handed to
//! [`crate::controller::Pipeline::run`]. Clones share state, so a UI task
//! can keep one clone and request a pause or abort while the loop awaits a
//! fragment. Both requests are one-shot; resuming after a pause means
//! starting a new run with a fresh signal.

use tokio_util::sync::CancellationToken;

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// Pause requested: committed progress is kept.
    Paused,
    /// Stop requested: the session is reset.
    Aborted,
}

/// Pause/abort tokens checked at every suspension point of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSignal {
    pause: CancellationToken,
    abort: CancellationToken,
}

impl RunSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause at the next fragment or batch boundary.
    pub fn pause(&self) {
        self.pause.cancel();
    }

    /// Request an abort; the in-flight request is dropped.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// The pending interruption, if any. Abort wins over pause.
    pub fn interruption(&self) -> Option<Interruption> {
        if self.is_aborted() {
            Some(Interruption::Aborted)
        } else if self.is_paused() {
            Some(Interruption::Paused)
        } else {
            None
        }
    }

    /// Resolves as soon as a pause or abort is requested.
    pub async fn interrupted(&self) -> Interruption {
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Interruption::Aborted,
            _ = self.pause.cancelled() => Interruption::Paused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn abort_wins_over_pause() {
        let signal = RunSignal::new();
        assert_eq!(signal.interruption(), None);
        signal.pause();
        assert_eq!(signal.interruption(), Some(Interruption::Paused));
        signal.abort();
        assert_eq!(signal.interruption(), Some(Interruption::Aborted));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let signal = RunSignal::new();
        let remote = signal.clone();
        let waiter = tokio::spawn(async move { signal.interrupted().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        remote.pause();
        assert_eq!(waiter.await.unwrap(), Interruption::Paused);
    }
}

/// Cooperative cancellation shared between a requester and one worker.
///
/// The flag lives behind a mutex rather than a bare atomic so that the
/// worker's "check flag, then hand the event to the channel" step and the
/// requester's "set flag" step are mutually exclusive. Once
/// [`CancelToken::cancel`] returns, the worker can deliver nothing further.
use crossbeam_channel::{SendTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// How long a single send attempt may hold the flag lock while the channel
/// is full. Between attempts the lock is released so `cancel` can get in.
const SEND_ATTEMPT: Duration = Duration::from_millis(20);

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<Mutex<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Blocks for at most one in-flight send attempt.
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Send `event` unless cancellation has been requested.
    ///
    /// Returns `false` if the token was cancelled before the event could be
    /// handed over, or if the receiving side has gone away. Either way the
    /// caller should stop producing.
    pub fn deliver<T>(&self, tx: &Sender<T>, event: T) -> bool {
        let mut event = event;
        loop {
            let guard = self.cancelled.lock();
            if *guard {
                return false;
            }
            match tx.send_timeout(event, SEND_ATTEMPT) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => {
                    event = returned;
                    MutexGuard::unlock_fair(guard);
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_sends_until_cancelled() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let token = CancelToken::new();
        assert!(token.deliver(&tx, 1));
        token.cancel();
        assert!(!token.deliver(&tx, 2));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), [1]);
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(!worker.is_cancelled());
        token.cancel();
        assert!(worker.is_cancelled());
    }

    #[test]
    fn deliver_to_dropped_receiver_reports_false() {
        let (tx, rx) = crossbeam_channel::bounded::<u8>(1);
        drop(rx);
        assert!(!CancelToken::new().deliver(&tx, 1));
    }

    #[test]
    fn cancel_unblocks_a_worker_stuck_on_a_full_channel() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(0).unwrap();
        let token = CancelToken::new();
        let worker = token.clone();
        let handle = std::thread::spawn(move || worker.deliver(&tx, 1));

        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
        assert!(!handle.join().unwrap());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), [0]);
    }
}

//! Per-thread turn concurrency control.
//!
//! Tracks every active turn twice — by thread and by turn — so both the
//! stream handler (one active turn per thread) and the cancel endpoint
//! (lookup by turn id) are O(1). Cancellation functions are invoked
//! outside the lock.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Drain polling cadence for [`TurnController::wait_for_idle`].
const IDLE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("thread already has an active turn")]
    ActiveTurnExists,

    #[error("turn is not active")]
    TurnNotActive,
}

#[derive(Clone)]
struct ActiveTurn {
    thread_id: String,
    turn_id: String,
    token: CancellationToken,
}

#[derive(Default)]
struct Registry {
    by_thread: HashMap<String, ActiveTurn>,
    by_turn: HashMap<String, ActiveTurn>,
}

/// The single-active-turn registry.
#[derive(Default)]
pub struct TurnController {
    registry: Mutex<Registry>,
}

impl TurnController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the thread's turn slot. Fails if the thread already has an
    /// active turn.
    pub fn activate(
        &self,
        thread_id: &str,
        turn_id: &str,
        token: CancellationToken,
    ) -> Result<(), ControllerError> {
        let mut registry = self.registry.lock();
        if registry.by_thread.contains_key(thread_id) {
            return Err(ControllerError::ActiveTurnExists);
        }
        let entry = ActiveTurn {
            thread_id: thread_id.to_owned(),
            turn_id: turn_id.to_owned(),
            token,
        };
        registry.by_thread.insert(thread_id.to_owned(), entry.clone());
        registry.by_turn.insert(turn_id.to_owned(), entry);
        Ok(())
    }

    /// Release the slot. Guarded against stale releases: a no-op unless
    /// the registered turn for `turn_id` still belongs to `thread_id`.
    pub fn release(&self, thread_id: &str, turn_id: &str) {
        let mut registry = self.registry.lock();
        let matches = registry
            .by_turn
            .get(turn_id)
            .map(|entry| entry.thread_id == thread_id)
            .unwrap_or(false);
        if matches {
            registry.by_turn.remove(turn_id);
            registry.by_thread.remove(thread_id);
        }
    }

    /// Cancel an active turn by id.
    pub fn cancel(&self, turn_id: &str) -> Result<(), ControllerError> {
        let token = {
            let registry = self.registry.lock();
            registry
                .by_turn
                .get(turn_id)
                .map(|entry| entry.token.clone())
                .ok_or(ControllerError::TurnNotActive)?
        };
        token.cancel();
        Ok(())
    }

    /// Cancel every active turn; returns how many were signalled.
    /// Drainage is observed by the caller via [`wait_for_idle`].
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = {
            let registry = self.registry.lock();
            registry
                .by_turn
                .values()
                .map(|entry| entry.token.clone())
                .collect()
        };
        let count = tokens.len();
        for token in tokens {
            token.cancel();
        }
        count
    }

    pub fn is_thread_active(&self, thread_id: &str) -> bool {
        self.registry.lock().by_thread.contains_key(thread_id)
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().by_turn.len()
    }

    /// Poll until every turn has released its slot. Returns `false` when
    /// `timeout` elapses first.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = tokio::time::interval(IDLE_POLL);
        loop {
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            ticker.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_then_conflict() {
        let controller = TurnController::new();
        controller
            .activate("th_1", "tn_1", CancellationToken::new())
            .unwrap();
        assert_eq!(
            controller.activate("th_1", "tn_2", CancellationToken::new()),
            Err(ControllerError::ActiveTurnExists)
        );
        // A different thread is unaffected.
        controller
            .activate("th_2", "tn_3", CancellationToken::new())
            .unwrap();
        assert_eq!(controller.active_count(), 2);
    }

    #[test]
    fn release_clears_both_indexes() {
        let controller = TurnController::new();
        controller
            .activate("th_1", "tn_1", CancellationToken::new())
            .unwrap();
        controller.release("th_1", "tn_1");
        assert!(!controller.is_thread_active("th_1"));
        assert_eq!(controller.active_count(), 0);
        // Slot is free again.
        controller
            .activate("th_1", "tn_2", CancellationToken::new())
            .unwrap();
    }

    #[test]
    fn stale_release_is_a_noop() {
        let controller = TurnController::new();
        controller
            .activate("th_1", "tn_1", CancellationToken::new())
            .unwrap();
        // Wrong thread/turn pairing must not free the slot.
        controller.release("th_other", "tn_1");
        assert!(controller.is_thread_active("th_1"));
        controller.release("th_1", "tn_unknown");
        assert!(controller.is_thread_active("th_1"));
    }

    #[test]
    fn cancel_signals_the_token() {
        let controller = TurnController::new();
        let token = CancellationToken::new();
        controller.activate("th_1", "tn_1", token.clone()).unwrap();

        controller.cancel("tn_1").unwrap();
        assert!(token.is_cancelled());
        // Entry stays registered until released by the pipeline.
        assert!(controller.is_thread_active("th_1"));

        assert_eq!(
            controller.cancel("tn_ghost"),
            Err(ControllerError::TurnNotActive)
        );
    }

    #[test]
    fn cancel_all_signals_everything() {
        let controller = TurnController::new();
        let t1 = CancellationToken::new();
        let t2 = CancellationToken::new();
        controller.activate("th_1", "tn_1", t1.clone()).unwrap();
        controller.activate("th_2", "tn_2", t2.clone()).unwrap();

        assert_eq!(controller.cancel_all(), 2);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_idle_times_out_while_busy() {
        let controller = TurnController::new();
        controller
            .activate("th_1", "tn_1", CancellationToken::new())
            .unwrap();
        assert!(!controller.wait_for_idle(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn wait_for_idle_observes_release() {
        let controller = std::sync::Arc::new(TurnController::new());
        controller
            .activate("th_1", "tn_1", CancellationToken::new())
            .unwrap();

        let controller2 = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            controller2.release("th_1", "tn_1");
        });

        assert!(controller.wait_for_idle(Duration::from_secs(2)).await);
    }
}

//! Retry budget and single-flight credential refresh
//!
//! Every storage call is tagged with the credential generation it was issued
//! under. When a call fails with expired credentials, the worker hands that
//! generation to [`CredentialCoordinator::recover`]:
//!
//! - if a refresh already happened since the call was issued, the call is
//!   simply retried and no budget is spent;
//! - otherwise one unit of budget is spent and, if budget remains, exactly one
//!   caller refreshes while the others wait for it.
//!
//! New calls wait in [`CredentialCoordinator::generation`] while a refresh is
//! running; calls already in flight are left alone.

use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::error::{AuthError, FatalCause, StorageError, TransferError};
use crate::traits::StorageService;
use crate::transfer::request::{AttemptOutcome, TransferAttempt};

#[derive(Debug, Clone)]
enum Terminal {
    Exhausted,
    RefreshFailed(AuthError),
}

#[derive(Debug)]
struct CredentialState {
    generation: u64,
    remaining: u32,
    refreshing: bool,
    terminal: Option<Terminal>,
    attempts: Vec<TransferAttempt>,
}

impl CredentialState {
    fn current_attempt(&mut self) -> Option<&mut TransferAttempt> {
        self.attempts.last_mut()
    }

    fn fail_current(&mut self, reason: String) {
        if let Some(attempt) = self.current_attempt()
            && attempt.outcome == AttemptOutcome::Pending
        {
            attempt.outcome = AttemptOutcome::Failed(reason);
        }
    }

    fn terminal_error(&self, terminal: &Terminal) -> TransferError {
        match terminal {
            Terminal::Exhausted => TransferError::RetryBudgetExhausted {
                attempts: self.attempts.len() as u32,
            },
            Terminal::RefreshFailed(err) => TransferError::Fatal(FatalCause::Refresh(err.clone())),
        }
    }
}

/// Per-transfer owner of the retry budget
#[derive(Debug)]
pub struct CredentialCoordinator {
    state: Mutex<CredentialState>,
    refreshed: Notify,
}

impl CredentialCoordinator {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(CredentialState {
                generation: 0,
                remaining: max_retries,
                refreshing: false,
                terminal: None,
                attempts: vec![TransferAttempt {
                    attempt_number: 1,
                    outcome: AttemptOutcome::Pending,
                }],
            }),
            refreshed: Notify::new(),
        }
    }

    // Lock the state once no refresh is running.
    async fn lock_idle(&self) -> MutexGuard<'_, CredentialState> {
        loop {
            let notified = self.refreshed.notified();
            {
                let state = self.state.lock().await;
                if !state.refreshing {
                    return state;
                }
            }
            notified.await;
        }
    }

    /// Generation to tag the next storage call with.
    ///
    /// Waits while a refresh is running and fails once the transfer has hit a
    /// terminal credential error.
    pub async fn generation(&self) -> Result<u64, TransferError> {
        let state = self.lock_idle().await;
        match &state.terminal {
            Some(terminal) => Err(state.terminal_error(terminal)),
            None => Ok(state.generation),
        }
    }

    /// Handle a `CredentialExpired` failure of a call issued under `observed`.
    ///
    /// `Ok(())` means the caller should retry the same call.
    pub async fn recover(
        &self,
        observed: u64,
        storage: &dyn StorageService,
        cause: &StorageError,
    ) -> Result<(), TransferError> {
        let mut state = self.lock_idle().await;

        if let Some(terminal) = &state.terminal {
            return Err(state.terminal_error(terminal));
        }
        if state.generation != observed {
            tracing::debug!(observed, current = state.generation, "Credentials already refreshed");
            return Ok(());
        }

        state.remaining = state.remaining.saturating_sub(1);
        state.fail_current(cause.to_string());

        if state.remaining == 0 {
            tracing::warn!(
                attempts = state.attempts.len(),
                "Credentials expired and retry budget is exhausted"
            );
            state.terminal = Some(Terminal::Exhausted);
            return Err(state.terminal_error(&Terminal::Exhausted));
        }

        tracing::warn!(remaining = state.remaining, "Credentials expired, refreshing");
        state.refreshing = true;
        drop(state);

        let result = storage.refresh_credentials().await;

        let mut state = self.state.lock().await;
        state.refreshing = false;
        let outcome = match result {
            Ok(()) => {
                state.generation += 1;
                let attempt_number = state.attempts.len() as u32 + 1;
                state.attempts.push(TransferAttempt {
                    attempt_number,
                    outcome: AttemptOutcome::Pending,
                });
                tracing::info!(attempt = attempt_number, "Credentials refreshed");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "Credential refresh failed");
                let terminal = Terminal::RefreshFailed(err);
                let error = state.terminal_error(&terminal);
                state.terminal = Some(terminal);
                Err(error)
            }
        };
        drop(state);
        self.refreshed.notify_waiters();

        outcome
    }

    /// Close the current attempt and return the full history
    pub async fn finish(&self, result: &Result<String, TransferError>) -> Vec<TransferAttempt> {
        let mut state = self.state.lock().await;
        match result {
            Ok(_) => {
                if let Some(attempt) = state.current_attempt()
                    && attempt.outcome == AttemptOutcome::Pending
                {
                    attempt.outcome = AttemptOutcome::Succeeded;
                }
            }
            Err(err) => state.fail_current(err.to_string()),
        }
        state.attempts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockStorageService;
    use std::sync::Arc;

    fn expired() -> StorageError {
        StorageError::CredentialExpired("ExpiredToken".into())
    }

    #[tokio::test]
    async fn test_recover_refreshes_and_advances_generation() {
        let mut storage = MockStorageService::new();
        storage
            .expect_refresh_credentials()
            .times(1)
            .returning(|| Ok(()));

        let coordinator = CredentialCoordinator::new(2);
        let generation = coordinator.generation().await.unwrap();
        coordinator
            .recover(generation, &storage, &expired())
            .await
            .unwrap();

        assert_eq!(coordinator.generation().await.unwrap(), generation + 1);
        let attempts = coordinator.finish(&Ok("key".into())).await;
        assert_eq!(attempts.len(), 2);
        assert!(matches!(attempts[0].outcome, AttemptOutcome::Failed(_)));
        assert_eq!(attempts[1].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_stale_generation_does_not_spend_budget() {
        let mut storage = MockStorageService::new();
        storage
            .expect_refresh_credentials()
            .times(1)
            .returning(|| Ok(()));

        let coordinator = CredentialCoordinator::new(2);
        coordinator.recover(0, &storage, &expired()).await.unwrap();
        // A second worker that failed under generation 0 just retries.
        coordinator.recover(0, &storage, &expired()).await.unwrap();
        coordinator.recover(0, &storage, &expired()).await.unwrap();

        assert_eq!(coordinator.generation().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let mut storage = MockStorageService::new();
        storage
            .expect_refresh_credentials()
            .times(2)
            .returning(|| Ok(()));

        let coordinator = CredentialCoordinator::new(3);
        coordinator.recover(0, &storage, &expired()).await.unwrap();
        coordinator.recover(1, &storage, &expired()).await.unwrap();
        let err = coordinator
            .recover(2, &storage, &expired())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::RetryBudgetExhausted { attempts: 3 }
        ));
        assert!(matches!(
            coordinator.generation().await,
            Err(TransferError::RetryBudgetExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_budget_never_refreshes() {
        let storage = MockStorageService::new();
        let coordinator = CredentialCoordinator::new(0);
        let err = coordinator
            .recover(0, &storage, &expired())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::RetryBudgetExhausted { attempts: 1 }
        ));
    }

    #[tokio::test]
    async fn test_refresh_failure_is_fatal_for_everyone() {
        let mut storage = MockStorageService::new();
        storage
            .expect_refresh_credentials()
            .times(1)
            .returning(|| Err(AuthError::new("login rejected")));

        let coordinator = CredentialCoordinator::new(5);
        let err = coordinator
            .recover(0, &storage, &expired())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Fatal(FatalCause::Refresh(_))
        ));

        let err = coordinator
            .recover(0, &storage, &expired())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Fatal(FatalCause::Refresh(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_expiry_refreshes_once() {
        let mut storage = MockStorageService::new();
        storage.expect_refresh_credentials().times(1).returning(|| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(())
        });
        let storage: Arc<dyn StorageService> = Arc::new(storage);
        let coordinator = Arc::new(CredentialCoordinator::new(2));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                coordinator.recover(0, storage.as_ref(), &expired()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(coordinator.generation().await.unwrap(), 1);
    }
}

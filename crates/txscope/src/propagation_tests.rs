//! Propagation state machine tests
//!
//! Exercises every (state, propagation) combination of the begin decision
//! table against the mock adapter, plus finalization discipline and the
//! owner-only commit/rollback behavior of `execute_in_transaction`.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::capability::CapabilityTable;
    use crate::driver::{DriverFailure, TransactionOp};
    use crate::error::{TxError, TxResult};
    use crate::mock::{HandleState, MockAdapter};
    use crate::options::{IsolationLevel, Propagation, TransactionOptions};
    use crate::unit_of_work::{BeginOutcome, UnitOfWork};

    fn fixture() -> (Arc<MockAdapter>, UnitOfWork) {
        let adapter = Arc::new(MockAdapter::new("postgres"));
        let unit = UnitOfWork::new(
            adapter.clone(),
            Arc::new(CapabilityTable::builtin().clone()),
        );
        (adapter, unit)
    }

    fn with(propagation: Propagation) -> TransactionOptions {
        TransactionOptions::new().with_propagation(propagation)
    }

    fn boom() -> TxError {
        TxError::Driver(DriverFailure::new(
            "postgres",
            TransactionOp::Execute,
            "boom",
        ))
    }

    // --- begin: Idle state -------------------------------------------------

    #[tokio::test]
    async fn idle_required_creates_and_owns() {
        let (adapter, unit) = fixture();
        let outcome = unit.begin(&with(Propagation::Required)).await.unwrap();
        assert!(outcome.owns_transaction());
        assert!(unit.is_transaction_active());
        assert_eq!(unit.owner_depth(), 1);
        assert_eq!(adapter.count_of(TransactionOp::Create), 1);
    }

    #[tokio::test]
    async fn idle_requires_new_creates_and_owns() {
        let (_, unit) = fixture();
        let outcome = unit.begin(&with(Propagation::RequiresNew)).await.unwrap();
        assert!(outcome.owns_transaction());
        assert_eq!(unit.get_transaction(), outcome.handle());
    }

    #[tokio::test]
    async fn idle_supports_creates_and_owns() {
        let (_, unit) = fixture();
        let outcome = unit.begin(&with(Propagation::Supports)).await.unwrap();
        assert!(outcome.owns_transaction());
    }

    #[tokio::test]
    async fn idle_mandatory_fails_with_violation() {
        let (adapter, unit) = fixture();
        let error = unit.begin(&with(Propagation::Mandatory)).await.unwrap_err();
        match &error {
            TxError::PropagationViolation { propagation, .. } => {
                assert_eq!(*propagation, Propagation::Mandatory);
            }
            other => panic!("expected propagation violation, got {:?}", other),
        }
        assert!(error.to_string().contains("MANDATORY"));
        assert!(adapter.journal().is_empty());
    }

    #[tokio::test]
    async fn idle_not_supported_proceeds_without_transaction() {
        let (adapter, unit) = fixture();
        let outcome = unit.begin(&with(Propagation::NotSupported)).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Nontransactional);
        assert!(!unit.is_transaction_active());
        assert!(adapter.journal().is_empty());
    }

    #[tokio::test]
    async fn idle_never_proceeds_without_transaction() {
        let (_, unit) = fixture();
        let outcome = unit.begin(&with(Propagation::Never)).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Nontransactional);
    }

    // --- begin: Active state -----------------------------------------------

    #[tokio::test]
    async fn active_required_joins_existing() {
        let (adapter, unit) = fixture();
        let outer = unit.begin(&with(Propagation::Required)).await.unwrap();
        let inner = unit.begin(&with(Propagation::Required)).await.unwrap();
        assert_eq!(inner, BeginOutcome::Joined(outer.handle().unwrap()));
        assert!(!inner.owns_transaction());
        assert_eq!(adapter.count_of(TransactionOp::Create), 1);
    }

    #[tokio::test]
    async fn active_supports_joins_existing() {
        let (_, unit) = fixture();
        let outer = unit.begin(&with(Propagation::Required)).await.unwrap();
        let inner = unit.begin(&with(Propagation::Supports)).await.unwrap();
        assert_eq!(inner, BeginOutcome::Joined(outer.handle().unwrap()));
    }

    #[tokio::test]
    async fn active_mandatory_joins_existing() {
        let (_, unit) = fixture();
        let outer = unit.begin(&with(Propagation::Required)).await.unwrap();
        let inner = unit.begin(&with(Propagation::Mandatory)).await.unwrap();
        assert_eq!(inner, BeginOutcome::Joined(outer.handle().unwrap()));
    }

    #[tokio::test]
    async fn active_requires_new_stacks_an_independent_transaction() {
        let (adapter, unit) = fixture();
        let outer = unit.begin(&with(Propagation::Required)).await.unwrap();
        let inner = unit.begin(&with(Propagation::RequiresNew)).await.unwrap();

        assert!(inner.owns_transaction());
        assert_ne!(inner.handle(), outer.handle());
        assert_eq!(unit.owner_depth(), 2);
        // The new transaction is the chain's current one.
        assert_eq!(unit.get_transaction(), inner.handle());
        assert_eq!(adapter.count_of(TransactionOp::Create), 2);
    }

    #[tokio::test]
    async fn active_not_supported_fails_with_violation() {
        let (_, unit) = fixture();
        unit.begin(&with(Propagation::Required)).await.unwrap();
        let error = unit
            .begin(&with(Propagation::NotSupported))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("NOT_SUPPORTED"));
        // The existing transaction is untouched by the violation.
        assert!(unit.is_transaction_active());
    }

    #[tokio::test]
    async fn active_never_fails_with_violation() {
        let (_, unit) = fixture();
        unit.begin(&with(Propagation::Required)).await.unwrap();
        let error = unit.begin(&with(Propagation::Never)).await.unwrap_err();
        match error {
            TxError::PropagationViolation { propagation, .. } => {
                assert_eq!(propagation, Propagation::Never);
            }
            other => panic!("expected propagation violation, got {:?}", other),
        }
    }

    // --- commit / rollback discipline --------------------------------------

    #[tokio::test]
    async fn finalizing_an_idle_context_fails() {
        let (_, unit) = fixture();
        assert_eq!(
            unit.commit().await.unwrap_err(),
            TxError::NoActiveTransaction {
                operation: "commit"
            }
        );
        assert_eq!(
            unit.rollback().await.unwrap_err(),
            TxError::NoActiveTransaction {
                operation: "rollback"
            }
        );
    }

    #[tokio::test]
    async fn second_finalize_always_fails() {
        let (_, unit) = fixture();
        unit.begin(&with(Propagation::Required)).await.unwrap();
        unit.commit().await.unwrap();
        assert!(matches!(
            unit.commit().await.unwrap_err(),
            TxError::NoActiveTransaction { .. }
        ));

        unit.begin(&with(Propagation::Required)).await.unwrap();
        unit.rollback().await.unwrap();
        assert!(matches!(
            unit.rollback().await.unwrap_err(),
            TxError::NoActiveTransaction { .. }
        ));
    }

    #[tokio::test]
    async fn commit_delegates_to_the_driver_then_clears() {
        let (adapter, unit) = fixture();
        let outcome = unit.begin(&with(Propagation::Required)).await.unwrap();
        unit.commit().await.unwrap();

        assert!(!unit.is_transaction_active());
        assert_eq!(
            adapter.handle_state(outcome.handle().unwrap()),
            Some(HandleState::Committed)
        );
    }

    #[tokio::test]
    async fn failed_driver_commit_leaves_the_transaction_active() {
        let (adapter, unit) = fixture();
        unit.begin(&with(Propagation::Required)).await.unwrap();

        adapter.fail_next(TransactionOp::Commit);
        let error = unit.commit().await.unwrap_err();
        assert!(matches!(error, TxError::Driver(_)));

        // The handle is not cleared; the caller decides what happens next.
        assert!(unit.is_transaction_active());
        unit.rollback().await.unwrap();
        assert!(!unit.is_transaction_active());
    }

    // --- execute_in_transaction ---------------------------------------------

    #[tokio::test]
    async fn nested_required_commits_exactly_once() {
        let (adapter, unit) = fixture();
        let unit_ref = &unit;

        let result: TxResult<i32> = unit
            .execute_in_transaction(&with(Propagation::Required), |outer| async move {
                let inner = unit_ref
                    .execute_in_transaction(&with(Propagation::Required), |handle| async move {
                        assert_eq!(handle, outer);
                        Ok::<_, TxError>(41)
                    })
                    .await?;
                // The inner, non-owning frame must not have committed.
                assert!(unit_ref.is_transaction_active());
                Ok(inner + 1)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(adapter.count_of(TransactionOp::Create), 1);
        assert_eq!(adapter.count_of(TransactionOp::Commit), 1);
        assert!(!unit.is_transaction_active());
    }

    #[tokio::test]
    async fn requires_new_failure_rolls_back_only_the_inner_transaction() {
        let (adapter, unit) = fixture();
        let unit_ref = &unit;

        let result: TxResult<&str> = unit
            .execute_in_transaction(&with(Propagation::Required), |outer| async move {
                let outer_handle = outer.unwrap();
                let inner: TxResult<()> = unit_ref
                    .execute_in_transaction(&with(Propagation::RequiresNew), |inner| async move {
                        assert_ne!(inner.unwrap(), outer_handle);
                        Err(boom())
                    })
                    .await;
                assert!(inner.is_err());
                // The enclosing transaction survives the inner rollback.
                assert_eq!(unit_ref.get_transaction(), Some(outer_handle));
                Ok("outer result")
            })
            .await;

        assert_eq!(result.unwrap(), "outer result");
        assert_eq!(adapter.count_of(TransactionOp::Create), 2);
        assert_eq!(adapter.count_of(TransactionOp::Commit), 1);
        assert_eq!(adapter.count_of(TransactionOp::Rollback), 1);

        let journal = adapter.journal();
        let inner_handle = journal[1].handle;
        let outer_handle = journal[0].handle;
        assert_eq!(adapter.handle_state(inner_handle), Some(HandleState::RolledBack));
        assert_eq!(adapter.handle_state(outer_handle), Some(HandleState::Committed));
    }

    #[tokio::test]
    async fn owner_rolls_back_on_work_failure_and_reraises() {
        let (adapter, unit) = fixture();

        let result: TxResult<()> = unit
            .execute_in_transaction(&with(Propagation::Required), |_| async { Err(boom()) })
            .await;

        assert_eq!(result.unwrap_err(), boom());
        assert!(!unit.is_transaction_active());
        assert_eq!(adapter.count_of(TransactionOp::Rollback), 1);
    }

    #[tokio::test]
    async fn non_owner_leaves_the_shared_transaction_to_its_owner() {
        let (adapter, unit) = fixture();
        let outcome = unit.begin(&with(Propagation::Required)).await.unwrap();

        let result: TxResult<()> = unit
            .execute_in_transaction(&with(Propagation::Required), |_| async { Err(boom()) })
            .await;
        assert!(result.is_err());

        // The joined frame rolled nothing back; the owner still decides.
        assert_eq!(adapter.count_of(TransactionOp::Rollback), 0);
        assert_eq!(unit.get_transaction(), outcome.handle());
        unit.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn commit_failure_is_surfaced_without_automatic_rollback() {
        let (adapter, unit) = fixture();
        adapter.fail_next(TransactionOp::Commit);

        let result: TxResult<()> = unit
            .execute_in_transaction(&with(Propagation::Required), |_| async { Ok(()) })
            .await;

        assert!(matches!(result.unwrap_err(), TxError::Driver(_)));
        assert_eq!(adapter.count_of(TransactionOp::Rollback), 0);
        assert!(unit.is_transaction_active());
        unit.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn nontransactional_work_receives_no_handle() {
        let (adapter, unit) = fixture();

        let result: TxResult<&str> = unit
            .execute_in_transaction(&with(Propagation::Never), |handle| async move {
                assert!(handle.is_none());
                Ok("ran bare")
            })
            .await;

        assert_eq!(result.unwrap(), "ran bare");
        assert!(adapter.journal().is_empty());
    }

    #[tokio::test]
    async fn application_errors_pass_through_unmodified() {
        #[derive(Debug, PartialEq)]
        enum AppError {
            Engine(TxError),
            Domain(&'static str),
        }
        impl From<TxError> for AppError {
            fn from(error: TxError) -> Self {
                AppError::Engine(error)
            }
        }

        let (adapter, unit) = fixture();
        let result: Result<(), AppError> = unit
            .execute_in_transaction(&with(Propagation::Required), |_| async {
                Err(AppError::Domain("insufficient funds"))
            })
            .await;

        assert_eq!(result.unwrap_err(), AppError::Domain("insufficient funds"));
        assert_eq!(adapter.count_of(TransactionOp::Rollback), 1);
    }

    // --- negotiation wiring --------------------------------------------------

    #[tokio::test]
    async fn negotiated_isolation_reaches_the_driver() {
        let (adapter, unit) = fixture();
        let options = with(Propagation::Required).with_isolation(IsolationLevel::Serializable);
        unit.begin(&options).await.unwrap();

        let journal = adapter.journal();
        let negotiated = journal[0].options.as_ref().unwrap();
        assert_eq!(negotiated.isolation, Some(IsolationLevel::Serializable));
        assert!(!negotiated.had_fallback());
    }

    #[tokio::test]
    async fn unsupported_isolation_downgrades_but_still_begins() {
        let (adapter, unit) = fixture();
        // SNAPSHOT is not a postgres level; the transaction must still start.
        let options = with(Propagation::Required).with_isolation(IsolationLevel::Snapshot);
        let outcome = unit.begin(&options).await.unwrap();

        assert!(outcome.owns_transaction());
        let negotiated = adapter.journal()[0].options.clone().unwrap();
        assert_eq!(negotiated.isolation, None);
        assert_eq!(negotiated.fallbacks.len(), 1);
    }

    #[tokio::test]
    async fn driver_create_failure_propagates_and_leaves_idle() {
        let (adapter, unit) = fixture();
        adapter.fail_next(TransactionOp::Create);

        let error = unit.begin(&with(Propagation::Required)).await.unwrap_err();
        assert!(matches!(error, TxError::Driver(_)));
        assert!(!unit.is_transaction_active());
    }
}

//! Escenarios de punta a punta del core de transferencias sobre dobles en
//! memoria: camino feliz, fondos insuficientes, replay idempotente,
//! duplicados concurrentes, límites, divisas y compensación.

mod support;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use support::TransferHarness;
use transfer_service::domain::entities::{
    Currency, TransactionStatus, TransferLimit, TransferState, Wallet,
};
use transfer_service::domain::error::{LimitWindow, TransferError};
use transfer_service::domain::types::{UserId, WalletId};
use transfer_service::use_cases::execute_transfer::TransferCommand;

fn seed_wallet(
    harness: &TransferHarness,
    user_id: UserId,
    balance: Decimal,
    currency: Currency,
) -> WalletId {
    let id = WalletId::new();
    let wallet =
        Wallet::reconstitute(id, user_id, "Main".to_string(), balance, currency, true, 1).unwrap();
    harness.wallet_repo.seed(wallet);
    id
}

fn command(
    source: WalletId,
    destination: WalletId,
    amount: Decimal,
    key: Option<&str>,
) -> TransferCommand {
    TransferCommand {
        source_wallet_id: source,
        destination_wallet_id: destination,
        amount,
        description: Some("dinner".to_string()),
        idempotency_key: key.map(String::from),
        external_reference_id: None,
    }
}

#[tokio::test]
async fn test_happy_path_moves_funds_and_advances_usage() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    let receipt = harness
        .use_case
        .execute(user_id, command(source, destination, dec!(150.00), Some("s1")))
        .await
        .unwrap();

    assert_eq!(receipt.status, TransactionStatus::COMPLETED);
    assert_eq!(receipt.metadata.transfer_state, Some(TransferState::Completed));
    assert_eq!(harness.wallet_repo.balance_of(source), dec!(850.00));
    assert_eq!(harness.wallet_repo.balance_of(destination), dec!(150.00));

    // La fila durable cierra con los snapshots conciliados.
    let row = harness.transaction_repo.by_key("s1").unwrap();
    assert_eq!(row.status, TransactionStatus::COMPLETED);
    assert_eq!(row.source_balance_before, Some(dec!(1000.00)));
    assert_eq!(row.source_balance_after, Some(dec!(850.00)));
    assert_eq!(row.destination_balance_before, Some(dec!(0.00)));
    assert_eq!(row.destination_balance_after, Some(dec!(150.00)));
    assert!(row.completed_at.is_some());

    // El consumo de límites avanzó dentro de la saga.
    let ledger = harness.limit_repo.get(user_id).unwrap();
    assert_eq!(ledger.daily_used, dec!(150.00));
    assert_eq!(ledger.monthly_used, dec!(150.00));
}

#[tokio::test]
async fn test_insufficient_balance_unwinds_and_records_failure() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(50.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    let result = harness
        .use_case
        .execute(user_id, command(source, destination, dec!(150.00), Some("s2")))
        .await;

    assert!(matches!(result, Err(TransferError::InsufficientBalance(id)) if id == source));
    assert_eq!(harness.wallet_repo.balance_of(source), dec!(50.00));
    assert_eq!(harness.wallet_repo.balance_of(destination), dec!(0.00));

    // Fila FAILED con el veredicto, sin reintentos consumidos.
    let row = harness.transaction_repo.by_key("s2").unwrap();
    assert_eq!(row.status, TransactionStatus::FAILED);
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.error_detail.unwrap().code, "insufficient_balance");

    // Ningún consumo de límite quedó registrado.
    let ledger = harness.limit_repo.get(user_id).unwrap();
    assert_eq!(ledger.daily_used, Decimal::ZERO);
}

#[tokio::test]
async fn test_idempotent_replay_returns_same_outcome_without_remutation() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    let first = harness
        .use_case
        .execute(user_id, command(source, destination, dec!(150.00), Some("abc")))
        .await
        .unwrap();

    let second = harness
        .use_case
        .execute(user_id, command(source, destination, dec!(150.00), Some("abc")))
        .await
        .unwrap();

    // Mismo id y cuerpo byte-igual; el balance se movió exactamente una vez.
    assert_eq!(first.id, second.id);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(harness.wallet_repo.balance_of(source), dec!(850.00));
    assert_eq!(harness.wallet_repo.balance_of(destination), dec!(150.00));

    // El replay salió del result cache publicado en el primer request.
    assert!(harness.cache.raw_entry("idempotency:abc").is_some());
}

#[tokio::test]
async fn test_concurrent_duplicates_mutate_exactly_once() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    let (a, b) = tokio::join!(
        harness
            .use_case
            .execute(user_id, command(source, destination, dec!(150.00), Some("k9"))),
        harness
            .use_case
            .execute(user_id, command(source, destination, dec!(150.00), Some("k9"))),
    );

    // Exactamente una transacción COMPLETED bajo la key.
    let completed: Vec<_> = harness
        .transaction_repo
        .all()
        .into_iter()
        .filter(|t| {
            t.idempotency_key.as_deref() == Some("k9")
                && t.status == TransactionStatus::COMPLETED
        })
        .collect();
    assert_eq!(completed.len(), 1);

    // El perdedor recibe Conflict o el mismo resultado replicado.
    let outcomes = [a, b];
    assert!(outcomes.iter().any(|r| r.is_ok()));
    for outcome in &outcomes {
        match outcome {
            Ok(receipt) => assert_eq!(receipt.id, completed[0].id),
            Err(e) => assert!(matches!(e, TransferError::Conflict(_))),
        }
    }

    // La billetera se mutó exactamente una vez.
    assert_eq!(harness.wallet_repo.balance_of(source), dec!(850.00));
    assert_eq!(harness.wallet_repo.balance_of(destination), dec!(150.00));
}

#[tokio::test]
async fn test_daily_limit_rejection_leaves_no_trace() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    let mut ledger = TransferLimit::new(user_id, dec!(100), dec!(1000), Utc::now().date_naive());
    ledger.record_usage(dec!(80));
    harness.limit_repo.seed(ledger);

    let result = harness
        .use_case
        .execute(user_id, command(source, destination, dec!(25.00), Some("s5")))
        .await;

    assert!(matches!(
        result,
        Err(TransferError::LimitExceeded(LimitWindow::Daily))
    ));

    // El uso no avanzó y no quedó fila registrada.
    assert_eq!(harness.limit_repo.get(user_id).unwrap().daily_used, dec!(80));
    assert!(harness.transaction_repo.by_key("s5").is_none());
    assert_eq!(harness.wallet_repo.balance_of(source), dec!(1000.00));
}

#[tokio::test]
async fn test_currency_mismatch_fails_at_validation() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::EUR);

    let result = harness
        .use_case
        .execute(user_id, command(source, destination, dec!(10.00), Some("s6")))
        .await;

    assert!(matches!(result, Err(TransferError::CurrencyMismatch)));
    assert_eq!(harness.wallet_repo.balance_of(source), dec!(1000.00));
    assert_eq!(harness.wallet_repo.balance_of(destination), dec!(0.00));

    // La fila no pasó de la validación: FAILED sin compensación.
    let row = harness.transaction_repo.by_key("s6").unwrap();
    assert_eq!(row.status, TransactionStatus::FAILED);
    assert_eq!(row.transfer_state, Some(TransferState::Failed));
    assert_eq!(row.error_detail.unwrap().code, "currency_mismatch");
}

#[tokio::test]
async fn test_credit_failure_compensates_both_wallets() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    // Todo crédito al destino falla: la saga debita y luego debe deshacer.
    harness.wallet_repo.fail_credits_on(destination);

    let result = harness
        .use_case
        .execute(user_id, command(source, destination, dec!(150.00), Some("s7")))
        .await;

    assert!(matches!(result, Err(TransferError::Store(_))));

    // Ambos balances quedaron como antes de la transferencia.
    assert_eq!(harness.wallet_repo.balance_of(source), dec!(1000.00));
    assert_eq!(harness.wallet_repo.balance_of(destination), dec!(0.00));

    let row = harness.transaction_repo.by_key("s7").unwrap();
    assert_eq!(row.status, TransactionStatus::FAILED);
    assert_eq!(row.transfer_state, Some(TransferState::Compensated));

    // El paso de crédito agotó sus reintentos de infraestructura.
    assert_eq!(row.retry_count, 2);

    // El débito quedó compensado en el snapshot de la saga.
    let saga = row.saga_state.unwrap();
    assert!(saga.compensated_steps.contains(&"debit_source".to_string()));

    // Sin consumo de límites.
    assert_eq!(harness.limit_repo.get(user_id).unwrap().daily_used, Decimal::ZERO);
}

#[tokio::test]
async fn test_cache_version_strictly_increases_per_wallet() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    harness
        .use_case
        .execute(user_id, command(source, destination, dec!(100.00), Some("v1")))
        .await
        .unwrap();

    let after_first = harness.cache.versioned_balance(source).unwrap();
    assert_eq!(after_first.balance, dec!(900.00));
    assert_eq!(after_first.version as i32, harness.wallet_repo.version_of(source));

    harness
        .use_case
        .execute(user_id, command(source, destination, dec!(100.00), Some("v2")))
        .await
        .unwrap();

    let after_second = harness.cache.versioned_balance(source).unwrap();
    assert!(after_second.version > after_first.version);
    assert_eq!(after_second.balance, dec!(800.00));
}

#[tokio::test]
async fn test_auto_key_requests_are_independent_transfers() {
    let harness = TransferHarness::new();
    let user_id = UserId::new();
    let source = seed_wallet(&harness, user_id, dec!(1000.00), Currency::USD);
    let destination = seed_wallet(&harness, UserId::new(), dec!(0.00), Currency::USD);

    // Sin key del caller: dos envíos idénticos son dos transferencias.
    harness
        .use_case
        .execute(user_id, command(source, destination, dec!(100.00), None))
        .await
        .unwrap();
    harness
        .use_case
        .execute(user_id, command(source, destination, dec!(100.00), None))
        .await
        .unwrap();

    assert_eq!(harness.wallet_repo.balance_of(source), dec!(800.00));
    assert_eq!(harness.wallet_repo.balance_of(destination), dec!(200.00));
}

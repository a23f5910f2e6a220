pub mod add_funds;
pub mod cache_sync;
pub mod create_wallet;
pub mod execute_transfer;
pub mod find_by_idempotency_key;
pub mod get_balance;
pub mod idempotency;
pub mod transfer_limits;
pub mod transfer_saga;

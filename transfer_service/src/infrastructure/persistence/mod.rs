pub mod limit_repository;
pub mod models;
pub mod transaction_repository;
pub mod wallet_repository;

//! Transfer Service Library
//!
//! This library is the core of the peer-to-peer transfer service, exporting
//! the modules used by the application binary and the integration tests.
//!
//! # Modules
//!
//! * `api` - HTTP surface (routes, auth extractor, error mapping).
//! * `config` - Environment-provided configuration.
//! * `domain` - Entities, the error sum type and the persistence/cache ports.
//! * `infrastructure` - PostgreSQL repositories and the Redis cache gateway.
//! * `jobs` - Background recovery of stuck sagas.
//! * `use_cases` - Application workflows: wallet mutation, limits, the
//!   idempotency gate and the transfer saga.

pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod jobs;
pub mod use_cases;

//! PostgreSQL flavour of the relational backend

pub mod backend_impl;
pub mod filter_impl;
pub mod schema;

pub use backend_impl::PostgresOperationService;
pub use filter_impl::PostgresFilterConverter;

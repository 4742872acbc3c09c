//! Shared database repository test infrastructure
//!
//! The same test logic runs against both SQLite and PostgreSQL. Tests are
//! organized as:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! Each entity has a test module containing shared async test functions
//! that take `&DbPool`, wired up by a `sqlite_test!` macro and a
//! `postgres_test!` macro (the latter `#[ignore]`d, requiring Docker).
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```

pub mod fixtures;
mod groups;
pub mod harness;
mod transfers;

/// Wire a shared `async fn(db: &DbPool)` test up to in-memory SQLite.
macro_rules! sqlite_test {
    ($name:ident) => {
        #[cfg(feature = "database-sqlite")]
        #[tokio::test]
        async fn $name() {
            let pool = crate::db::tests::harness::create_sqlite_pool().await;
            crate::db::tests::harness::run_sqlite_migrations(&pool).await;
            let db = crate::db::DbPool::from_sqlite(pool);
            super::$name(&db).await;
        }
    };
}

/// Wire a shared test up to an isolated PostgreSQL schema.
macro_rules! postgres_test {
    ($name:ident) => {
        #[cfg(feature = "database-postgres")]
        #[tokio::test]
        #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
        async fn $name() {
            let pool = crate::db::tests::harness::postgres::create_isolated_postgres_pool().await;
            crate::db::tests::harness::postgres::run_postgres_migrations(&pool).await;
            let db = crate::db::DbPool::from_postgres(pool);
            super::$name(&db).await;
        }
    };
}

pub(crate) use postgres_test;
pub(crate) use sqlite_test;

//! Test helpers shared by the integration tests.

mod container;

pub use container::PostgresContainer;

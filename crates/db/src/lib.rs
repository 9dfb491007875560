pub mod connection;
pub mod executor;

pub use connection::{connect, connect_with_settings, DbPool};
pub use executor::SqliteQueryExecutor;

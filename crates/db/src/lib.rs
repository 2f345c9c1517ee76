//! PostgreSQL collaborators for `dbfleet-core`, built on `sqlx`.

pub mod connection;
pub mod directory;
pub mod settings;

pub use connection::{PgConnectionProvider, PgTargetConnection};
pub use directory::PgDirectorySource;
pub use settings::PgServerConfig;

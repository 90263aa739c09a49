pub mod connection;
pub mod fixtures;
pub mod lookup;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, ping, DbPool};
pub use fixtures::{DemoSeedDataset, SeedResult, VerificationResult};
pub use lookup::UnderwritingLookup;

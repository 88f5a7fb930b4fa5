pub mod fixtures;
pub mod repositories;

pub use fixtures::{DemoDataset, SeedResult, VerificationResult};
pub use repositories::{InMemoryRepositories, JsonCatalogStore, StoredRecords};

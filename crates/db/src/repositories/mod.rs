use kitwright_core::domain::pricing_rule::PricingRuleRecord;
use kitwright_core::domain::rule::ConfigurationRuleRecord;

pub mod json;
pub mod memory;

pub use json::{JsonCatalogStore, StoredRecords};
pub use memory::{
    InMemoryCatalogRepository, InMemoryConfigurationStore, InMemoryInventory,
    InMemoryPricingRuleRepository, InMemoryRepositories, InMemoryRuleRepository,
};

/// Active rules, highest priority first, ties by rule id.
pub(crate) fn active_rules_in_order(
    records: Vec<ConfigurationRuleRecord>,
) -> Vec<ConfigurationRuleRecord> {
    let mut records = records.into_iter().filter(|record| record.active).collect::<Vec<_>>();
    records.sort_by(|left, right| {
        right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id))
    });
    records
}

pub(crate) fn active_pricing_rules_in_order(
    records: Vec<PricingRuleRecord>,
) -> Vec<PricingRuleRecord> {
    let mut records = records.into_iter().filter(|record| record.active).collect::<Vec<_>>();
    records.sort_by(|left, right| {
        left.sequence.cmp(&right.sequence).then_with(|| left.id.cmp(&right.id))
    });
    records
}

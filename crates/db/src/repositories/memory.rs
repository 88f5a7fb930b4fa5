use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use kitwright_core::domain::configuration::{ConfigurationId, VerifiedConfiguration};
use kitwright_core::domain::pricing_rule::PricingRuleRecord;
use kitwright_core::domain::product::{Product, ProductId, ValueId};
use kitwright_core::domain::rule::ConfigurationRuleRecord;
use kitwright_core::errors::RepositoryError;
use kitwright_core::repository::{
    CatalogRepository, ConfigurationStore, InventoryChecker, PricingRuleRepository,
    RuleRepository,
};

use super::{active_pricing_rules_in_order, active_rules_in_order};

#[derive(Default)]
pub struct InMemoryCatalogRepository {
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryCatalogRepository {
    pub async fn save(&self, product: Product) {
        let mut products = self.products.write().await;
        products.insert(product.id.0.clone(), product);
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn product_with_options(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.get(&product_id.0).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<HashMap<String, Vec<ConfigurationRuleRecord>>>,
}

impl InMemoryRuleRepository {
    pub async fn save(&self, record: ConfigurationRuleRecord) {
        let mut rules = self.rules.write().await;
        let entry = rules.entry(record.product_id.0.clone()).or_default();
        entry.retain(|existing| existing.id != record.id);
        entry.push(record);
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn active_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<ConfigurationRuleRecord>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(active_rules_in_order(rules.get(&product_id.0).cloned().unwrap_or_default()))
    }
}

#[derive(Default)]
pub struct InMemoryPricingRuleRepository {
    rules: RwLock<HashMap<String, Vec<PricingRuleRecord>>>,
}

impl InMemoryPricingRuleRepository {
    pub async fn save(&self, record: PricingRuleRecord) {
        let mut rules = self.rules.write().await;
        let entry = rules.entry(record.product_id.0.clone()).or_default();
        entry.retain(|existing| existing.id != record.id);
        entry.push(record);
    }
}

#[async_trait]
impl PricingRuleRepository for InMemoryPricingRuleRepository {
    async fn active_pricing_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<PricingRuleRecord>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(active_pricing_rules_in_order(rules.get(&product_id.0).cloned().unwrap_or_default()))
    }
}

/// Stock flags per value id. Values never registered are reported as out of
/// stock.
#[derive(Default)]
pub struct InMemoryInventory {
    stock: RwLock<HashMap<ValueId, bool>>,
}

impl InMemoryInventory {
    pub async fn set_available(&self, value_id: ValueId, available: bool) {
        let mut stock = self.stock.write().await;
        stock.insert(value_id, available);
    }
}

#[async_trait]
impl InventoryChecker for InMemoryInventory {
    async fn check_availability(
        &self,
        value_ids: &[ValueId],
    ) -> Result<BTreeMap<ValueId, bool>, RepositoryError> {
        let stock = self.stock.read().await;
        Ok(value_ids
            .iter()
            .map(|value_id| (value_id.clone(), stock.get(value_id).copied().unwrap_or(false)))
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryConfigurationStore {
    configurations: RwLock<HashMap<String, VerifiedConfiguration>>,
}

impl InMemoryConfigurationStore {
    pub async fn find_by_id(&self, id: &ConfigurationId) -> Option<VerifiedConfiguration> {
        let configurations = self.configurations.read().await;
        configurations.get(&id.0).cloned()
    }

    pub async fn len(&self) -> usize {
        self.configurations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.configurations.read().await.is_empty()
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigurationStore {
    async fn save(
        &self,
        configuration: VerifiedConfiguration,
    ) -> Result<ConfigurationId, RepositoryError> {
        let id = ConfigurationId::generate();
        let mut configurations = self.configurations.write().await;
        configurations.insert(id.0.clone(), configuration);
        Ok(id)
    }
}

/// All five contracts backed by memory, for tests and the demo dataset.
#[derive(Default)]
pub struct InMemoryRepositories {
    pub catalog: InMemoryCatalogRepository,
    pub rules: InMemoryRuleRepository,
    pub pricing_rules: InMemoryPricingRuleRepository,
    pub inventory: InMemoryInventory,
    pub configurations: InMemoryConfigurationStore,
}

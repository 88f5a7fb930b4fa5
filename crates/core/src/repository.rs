//! Narrow contracts to the collaborators that own catalog data, rule storage,
//! stock levels and saved configurations. The engines never perform I/O
//! themselves; sessions and the checkout path call through these traits.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::configuration::{ConfigurationId, VerifiedConfiguration};
use crate::domain::pricing_rule::PricingRuleRecord;
use crate::domain::product::{Product, ProductId, ValueId};
use crate::domain::rule::ConfigurationRuleRecord;
use crate::errors::RepositoryError;

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Active rules for the product, highest priority first.
    async fn active_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<ConfigurationRuleRecord>, RepositoryError>;
}

#[async_trait]
pub trait PricingRuleRepository: Send + Sync {
    async fn active_pricing_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<PricingRuleRecord>, RepositoryError>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn product_with_options(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Product>, RepositoryError>;
}

#[async_trait]
pub trait InventoryChecker: Send + Sync {
    async fn check_availability(
        &self,
        value_ids: &[ValueId],
    ) -> Result<BTreeMap<ValueId, bool>, RepositoryError>;
}

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn save(
        &self,
        configuration: VerifiedConfiguration,
    ) -> Result<ConfigurationId, RepositoryError>;
}

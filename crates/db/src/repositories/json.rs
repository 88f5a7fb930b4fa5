//! Catalog, rules, stock and saved configurations as JSON files under one
//! data directory:
//!
//! ```text
//! <root>/products/<product_id>.json        Product with options and values
//! <root>/rules/<product_id>.json           [ConfigurationRuleRecord]
//! <root>/pricing_rules/<product_id>.json   [PricingRuleRecord]
//! <root>/inventory.json                    { value_id: bool }
//! <root>/configurations/<id>.json          VerifiedConfiguration
//! ```
//!
//! A missing rule file means the product has no rules. A missing inventory
//! file means nothing is in stock. Rule files are decoded entry by entry: an
//! entry that does not fit the record shape is logged and skipped.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

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

const PRODUCTS_DIR: &str = "products";
const RULES_DIR: &str = "rules";
const PRICING_RULES_DIR: &str = "pricing_rules";
const CONFIGURATIONS_DIR: &str = "configurations";
const INVENTORY_FILE: &str = "inventory.json";

/// Entries read from one rule file, minus those that did not decode.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecords<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

impl<T> StoredRecords<T> {
    pub fn total(&self) -> usize {
        self.records.len() + self.skipped
    }
}

impl<T> Default for StoredRecords<T> {
    fn default() -> Self {
        Self { records: Vec::new(), skipped: 0 }
    }
}

#[derive(Clone, Debug)]
pub struct JsonCatalogStore {
    root: PathBuf,
}

impl JsonCatalogStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write_product(&self, product: &Product) -> Result<(), RepositoryError> {
        let path = self.entry_path(PRODUCTS_DIR, &product.id.0)?;
        write_json(&path, product).await
    }

    pub async fn write_rules(
        &self,
        product_id: &ProductId,
        records: &[ConfigurationRuleRecord],
    ) -> Result<(), RepositoryError> {
        let path = self.entry_path(RULES_DIR, &product_id.0)?;
        write_json(&path, &records).await
    }

    pub async fn write_pricing_rules(
        &self,
        product_id: &ProductId,
        records: &[PricingRuleRecord],
    ) -> Result<(), RepositoryError> {
        let path = self.entry_path(PRICING_RULES_DIR, &product_id.0)?;
        write_json(&path, &records).await
    }

    pub async fn write_inventory(
        &self,
        stock: &BTreeMap<ValueId, bool>,
    ) -> Result<(), RepositoryError> {
        write_json(&self.root.join(INVENTORY_FILE), stock).await
    }

    /// Product ids with a catalog file, sorted.
    pub async fn product_ids(&self) -> Result<Vec<ProductId>, RepositoryError> {
        let dir = self.root.join(PRODUCTS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(storage_error(&dir, error)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|error| storage_error(&dir, error))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(ProductId::from(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Every stored rule record for the product, inactive ones included.
    pub async fn all_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<StoredRecords<ConfigurationRuleRecord>, RepositoryError> {
        let path = self.entry_path(RULES_DIR, &product_id.0)?;
        read_records(&path, "engine.rules.skipped_malformed").await
    }

    pub async fn all_pricing_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<StoredRecords<PricingRuleRecord>, RepositoryError> {
        let path = self.entry_path(PRICING_RULES_DIR, &product_id.0)?;
        read_records(&path, "engine.pricing.skipped_malformed").await
    }

    pub async fn find_configuration(
        &self,
        id: &ConfigurationId,
    ) -> Result<Option<VerifiedConfiguration>, RepositoryError> {
        let path = self.entry_path(CONFIGURATIONS_DIR, &id.0)?;
        read_json(&path).await
    }

    fn entry_path(&self, dir: &str, id: &str) -> Result<PathBuf, RepositoryError> {
        let safe = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        if !safe {
            return Err(RepositoryError::Storage(format!("`{id}` is not a valid identifier")));
        }
        Ok(self.root.join(dir).join(format!("{id}.json")))
    }
}

#[async_trait]
impl CatalogRepository for JsonCatalogStore {
    async fn product_with_options(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        let path = self.entry_path(PRODUCTS_DIR, &product_id.0)?;
        read_json(&path).await
    }
}

#[async_trait]
impl RuleRepository for JsonCatalogStore {
    async fn active_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<ConfigurationRuleRecord>, RepositoryError> {
        Ok(active_rules_in_order(self.all_rules(product_id).await?.records))
    }
}

#[async_trait]
impl PricingRuleRepository for JsonCatalogStore {
    async fn active_pricing_rules(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<PricingRuleRecord>, RepositoryError> {
        Ok(active_pricing_rules_in_order(self.all_pricing_rules(product_id).await?.records))
    }
}

#[async_trait]
impl InventoryChecker for JsonCatalogStore {
    async fn check_availability(
        &self,
        value_ids: &[ValueId],
    ) -> Result<BTreeMap<ValueId, bool>, RepositoryError> {
        let stock: BTreeMap<ValueId, bool> =
            read_json(&self.root.join(INVENTORY_FILE)).await?.unwrap_or_default();
        Ok(value_ids
            .iter()
            .map(|value_id| (value_id.clone(), stock.get(value_id).copied().unwrap_or(false)))
            .collect())
    }
}

#[async_trait]
impl ConfigurationStore for JsonCatalogStore {
    async fn save(
        &self,
        configuration: VerifiedConfiguration,
    ) -> Result<ConfigurationId, RepositoryError> {
        let id = ConfigurationId::generate();
        let path = self.entry_path(CONFIGURATIONS_DIR, &id.0)?;
        write_json(&path, &configuration).await?;
        Ok(id)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RepositoryError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "json entry not found");
            return Ok(None);
        }
        Err(error) => return Err(storage_error(path, error)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|error| RepositoryError::Decode(format!("{}: {error}", path.display())))
}

/// Reads a JSON array and decodes each element on its own. A file that is not
/// an array at all is still a decode error.
async fn read_records<T: DeserializeOwned>(
    path: &Path,
    event_name: &'static str,
) -> Result<StoredRecords<T>, RepositoryError> {
    let Some(entries) = read_json::<Vec<Value>>(path).await? else {
        return Ok(StoredRecords::default());
    };

    let mut stored = StoredRecords { records: Vec::with_capacity(entries.len()), skipped: 0 };
    for (index, entry) in entries.into_iter().enumerate() {
        let rule_id = entry.get("id").and_then(Value::as_str).unwrap_or("<missing>").to_owned();
        match serde_json::from_value::<T>(entry) {
            Ok(record) => stored.records.push(record),
            Err(error) => {
                warn!(
                    event_name,
                    path = %path.display(),
                    index,
                    rule_id = %rule_id,
                    error = %error,
                    "skipping malformed rule entry"
                );
                stored.skipped += 1;
            }
        }
    }
    Ok(stored)
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RepositoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|error| storage_error(parent, error))?;
    }
    let body = serde_json::to_vec_pretty(value)
        .map_err(|error| RepositoryError::Decode(format!("{}: {error}", path.display())))?;
    fs::write(path, body).await.map_err(|error| storage_error(path, error))
}

fn storage_error(path: &Path, error: std::io::Error) -> RepositoryError {
    RepositoryError::Storage(format!("{}: {error}", path.display()))
}

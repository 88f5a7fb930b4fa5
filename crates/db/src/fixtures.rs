use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde_json::{json, Value};

use kitwright_core::cpq::pricing::decode_pricing_rules;
use kitwright_core::cpq::rules::decode_rules;
use kitwright_core::domain::pricing_rule::{PricingRuleId, PricingRuleRecord};
use kitwright_core::domain::product::{
    ConfigOption, OptionId, OptionType, OptionValue, Product, ProductId, ValueId,
};
use kitwright_core::domain::rule::{ConfigurationRuleRecord, RuleId};
use kitwright_core::errors::RepositoryError;
use kitwright_core::repository::{CatalogRepository, InventoryChecker};

use crate::repositories::{InMemoryRepositories, JsonCatalogStore};

pub const DEMO_PRODUCT_IDS: &[&str] = &["lt-air", "ws-pro"];

/// Values the demo inventory reports as out of stock.
const OUT_OF_STOCK: &[&str] = &["2TB", "RTX4090-ti"];

/// Deterministic demo catalog: a workstation with a GPU/cooling rule set and
/// three pricing rules, plus a small laptop.
#[derive(Clone, Debug)]
pub struct DemoDataset {
    pub products: Vec<Product>,
    pub rules: Vec<ConfigurationRuleRecord>,
    pub pricing_rules: Vec<PricingRuleRecord>,
    pub inventory: BTreeMap<ValueId, bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub products: usize,
    pub rules: usize,
    pub pricing_rules: usize,
    pub inventory_entries: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

impl DemoDataset {
    pub fn standard() -> Self {
        let products = vec![laptop(), workstation()];
        let inventory = products
            .iter()
            .flat_map(|product| product.options.iter())
            .flat_map(|option| option.values.iter())
            .map(|value| (value.id.clone(), !OUT_OF_STOCK.contains(&value.id.as_str())))
            .collect();

        Self { products, rules: rules(), pricing_rules: pricing_rules(), inventory }
    }

    pub async fn load_into_memory(&self, repos: &InMemoryRepositories) -> SeedResult {
        for product in &self.products {
            repos.catalog.save(product.clone()).await;
        }
        for record in &self.rules {
            repos.rules.save(record.clone()).await;
        }
        for record in &self.pricing_rules {
            repos.pricing_rules.save(record.clone()).await;
        }
        for (value_id, available) in &self.inventory {
            repos.inventory.set_available(value_id.clone(), *available).await;
        }
        self.seed_result()
    }

    /// Writes the dataset into the store, replacing files for the demo
    /// products. Other products in the data directory are left alone.
    pub async fn write_to(&self, store: &JsonCatalogStore) -> Result<SeedResult, RepositoryError> {
        for product in &self.products {
            store.write_product(product).await?;
            let rules = self
                .rules
                .iter()
                .filter(|record| record.product_id == product.id)
                .cloned()
                .collect::<Vec<_>>();
            store.write_rules(&product.id, &rules).await?;
            let pricing_rules = self
                .pricing_rules
                .iter()
                .filter(|record| record.product_id == product.id)
                .cloned()
                .collect::<Vec<_>>();
            store.write_pricing_rules(&product.id, &pricing_rules).await?;
        }
        store.write_inventory(&self.inventory).await?;
        Ok(self.seed_result())
    }

    /// Checks that every demo product is present, its stored rules all
    /// decode, and each of its values has an inventory entry.
    pub async fn verify(store: &JsonCatalogStore) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for raw_id in DEMO_PRODUCT_IDS {
            let product_id = ProductId::from(*raw_id);
            let Some(product) = store.product_with_options(&product_id).await? else {
                checks.push((format!("{raw_id}: product"), false));
                continue;
            };
            checks.push((format!("{raw_id}: product"), true));

            let rules = store.all_rules(&product_id).await?;
            let total = rules.total();
            checks.push((
                format!("{raw_id}: rules decode"),
                decode_rules(rules.records).len() == total,
            ));

            let pricing_rules = store.all_pricing_rules(&product_id).await?;
            let total = pricing_rules.total();
            checks.push((
                format!("{raw_id}: pricing rules decode"),
                decode_pricing_rules(pricing_rules.records).len() == total,
            ));

            let value_ids = product
                .options
                .iter()
                .flat_map(|option| option.values.iter().map(|value| value.id.clone()))
                .collect::<Vec<_>>();
            let stock = store.check_availability(&value_ids).await?;
            let in_stock = value_ids
                .iter()
                .filter(|value_id| !OUT_OF_STOCK.contains(&value_id.as_str()))
                .all(|value_id| stock.get(value_id).copied().unwrap_or(false));
            checks.push((format!("{raw_id}: inventory"), in_stock));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    fn seed_result(&self) -> SeedResult {
        SeedResult {
            products: self.products.len(),
            rules: self.rules.len(),
            pricing_rules: self.pricing_rules.len(),
            inventory_entries: self.inventory.len(),
        }
    }
}

fn option(
    product_id: &str,
    id: &str,
    name: &str,
    option_type: OptionType,
    required: bool,
    display_order: i32,
    values: &[(&str, &str, i64)],
) -> ConfigOption {
    ConfigOption {
        id: OptionId::from(id),
        product_id: ProductId::from(product_id),
        name: name.to_owned(),
        option_type,
        required,
        display_order,
        values: values
            .iter()
            .zip(0..)
            .map(|((value_id, value_name, modifier), order)| OptionValue {
                id: ValueId::from(*value_id),
                config_option_id: OptionId::from(id),
                name: (*value_name).to_owned(),
                price_modifier: Decimal::new(*modifier, 0),
                available: *value_id != "RTX4090-ti",
                display_order: order,
            })
            .collect(),
    }
}

fn workstation() -> Product {
    Product {
        id: ProductId::from("ws-pro"),
        name: "Workstation Pro".to_owned(),
        base_price: Decimal::new(1000, 0),
        category: "workstations".to_owned(),
        options: vec![
            option(
                "ws-pro",
                "memory",
                "Memory",
                OptionType::Size,
                true,
                0,
                &[("8GB", "8 GB", 0), ("16GB", "16 GB", 50), ("32GB", "32 GB", 150)],
            ),
            option(
                "ws-pro",
                "gpu",
                "Graphics",
                OptionType::Feature,
                true,
                1,
                &[
                    ("integrated", "Integrated", 0),
                    ("RTX4070", "RTX 4070", 400),
                    ("RTX4080", "RTX 4080", 700),
                    ("RTX4090", "RTX 4090", 1200),
                    ("RTX4090-ti", "RTX 4090 Ti", 1500),
                ],
            ),
            option(
                "ws-pro",
                "color",
                "Chassis color",
                OptionType::Color,
                false,
                2,
                &[("silver", "Silver", 0), ("black", "Black", 25)],
            ),
            option(
                "ws-pro",
                "storage",
                "Storage",
                OptionType::Size,
                false,
                3,
                &[("512GB", "512 GB SSD", 0), ("1TB", "1 TB SSD", 80), ("2TB", "2 TB SSD", 200)],
            ),
            option(
                "ws-pro",
                "cooling",
                "Cooling",
                OptionType::Accessory,
                false,
                4,
                &[("air", "Air", 0), ("air-plus", "Air Plus", 30), ("liquid", "Liquid", 120)],
            ),
            option(
                "ws-pro",
                "warranty",
                "Warranty",
                OptionType::Accessory,
                false,
                5,
                &[("none", "None", 0), ("3yr", "3 year on-site", 90)],
            ),
        ],
    }
}

fn laptop() -> Product {
    Product {
        id: ProductId::from("lt-air"),
        name: "Laptop Air".to_owned(),
        base_price: Decimal::new(1200, 0),
        category: "laptops".to_owned(),
        options: vec![
            option(
                "lt-air",
                "color",
                "Color",
                OptionType::Color,
                false,
                0,
                &[("silver", "Silver", 0), ("midnight", "Midnight", 30)],
            ),
            option(
                "lt-air",
                "memory",
                "Memory",
                OptionType::Size,
                true,
                1,
                &[("16GB", "16 GB", 0), ("24GB", "24 GB", 200)],
            ),
            option(
                "lt-air",
                "storage",
                "Storage",
                OptionType::Size,
                true,
                2,
                &[("256GB", "256 GB", 0), ("512GB", "512 GB", 200), ("1TB", "1 TB", 400)],
            ),
        ],
    }
}

fn rule(
    product_id: &str,
    id: &str,
    name: &str,
    rule_type: &str,
    priority: i32,
    conditions: Value,
    actions: Value,
) -> ConfigurationRuleRecord {
    ConfigurationRuleRecord {
        id: RuleId(id.to_owned()),
        product_id: ProductId::from(product_id),
        name: name.to_owned(),
        rule_type: rule_type.to_owned(),
        conditions,
        actions,
        priority,
        active: true,
    }
}

fn rules() -> Vec<ConfigurationRuleRecord> {
    vec![
        rule(
            "ws-pro",
            "ws-4090-memory",
            "RTX 4090 memory floor",
            "restriction",
            100,
            json!({"selected_options": {"memory": "8GB", "gpu": "RTX4090"}}),
            json!({"restricted_options": ["gpu"]}),
        ),
        rule(
            "ws-pro",
            "ws-4090-cooling",
            "RTX 4090 cooling",
            "dependency",
            90,
            json!({"selected_options": {"gpu": "RTX4090"}}),
            json!({"required_option": "cooling"}),
        ),
        rule(
            "ws-pro",
            "ws-4090-liquid",
            "RTX 4090 liquid cooling",
            "auto_select",
            80,
            json!({"selected_options": {"gpu": "RTX4090"}}),
            json!({"auto_select_option": "cooling", "auto_select_value": "liquid"}),
        ),
        rule(
            "ws-pro",
            "ws-liquid-install",
            "Liquid cooling installation",
            "pricing",
            10,
            json!({"selected_options": {"cooling": "liquid"}}),
            json!({"price_modifier": 45}),
        ),
        rule(
            "lt-air",
            "lt-1tb-memory",
            "1 TB storage memory",
            "dependency",
            50,
            json!({"selected_options": {"storage": "1TB"}, "product_type": "laptops"}),
            json!({"required_option": "memory"}),
        ),
    ]
}

fn pricing_rule(
    id: &str,
    name: &str,
    rule_type: &str,
    conditions: Value,
    discount_type: &str,
    discount_value: Value,
    sequence: i32,
) -> PricingRuleRecord {
    PricingRuleRecord {
        id: PricingRuleId(id.to_owned()),
        product_id: ProductId::from("ws-pro"),
        name: name.to_owned(),
        description: None,
        rule_type: rule_type.to_owned(),
        conditions,
        discount_type: discount_type.to_owned(),
        discount_value,
        min_quantity: 1,
        valid_from: None,
        valid_until: None,
        sequence,
        active: true,
    }
}

fn pricing_rules() -> Vec<PricingRuleRecord> {
    vec![
        pricing_rule(
            "ws-volume-5",
            "Volume 5+",
            "volume_discount",
            json!({"min_quantity": 5}),
            "percentage",
            json!(8),
            10,
        ),
        pricing_rule(
            "ws-education",
            "Education",
            "conditional",
            json!({"customer_segment": "education"}),
            "percentage",
            json!(10),
            20,
        ),
        pricing_rule(
            "ws-care-bundle",
            "Care bundle",
            "bundle",
            json!({"required_options": ["warranty", "storage"]}),
            "fixed_amount",
            json!("50.00"),
            30,
        ),
    ]
}

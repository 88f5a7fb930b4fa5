use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::product::ProductId;
use crate::domain::selection::Selection;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationId(pub String);

impl ConfigurationId {
    pub fn generate() -> Self {
        Self(format!("CFG-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a client hands to the checkout path. Nothing in here is trusted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSubmission {
    pub product_id: ProductId,
    pub selection: Selection,
    pub quantity: u32,
    #[serde(default)]
    pub customer_segment: Option<String>,
    pub submitted_price: Decimal,
}

/// A configuration whose selection and price were recomputed server side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedConfiguration {
    pub product_id: ProductId,
    pub selection: Selection,
    pub selection_fingerprint: String,
    pub quantity: u32,
    pub customer_segment: Option<String>,
    pub final_price: Decimal,
    pub verified_at: DateTime<Utc>,
}

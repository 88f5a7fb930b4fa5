use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::payload::{decimal_or_zero, decode_section};
use crate::domain::product::{OptionId, ProductId, ValueId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PricingRuleId(pub String);

impl fmt::Display for PricingRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingCondition {
    VolumeDiscount {
        min_quantity: Option<u32>,
    },
    TimeBased,
    Bundle {
        required_options: Vec<OptionId>,
    },
    Conditional {
        customer_segment: Option<String>,
        selected_options: Option<BTreeMap<OptionId, ValueId>>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: PricingRuleId,
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    /// Application order, ascending. Ties fall back to rule id.
    pub sequence: i32,
    pub condition: PricingCondition,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_quantity: u32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub active: bool,
}

impl PricingRule {
    /// Unset bounds are open; both bounds are inclusive.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        let after_start = self.valid_from.map_or(true, |from| from <= at);
        let before_end = self.valid_until.map_or(true, |until| at <= until);
        after_start && before_end
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingRuleRecord {
    pub id: PricingRuleId,
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub conditions: Value,
    pub discount_type: String,
    #[serde(default)]
    pub discount_value: Value,
    #[serde(default = "default_min_quantity")]
    pub min_quantity: u32,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VolumePayload {
    min_quantity: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BundlePayload {
    #[serde(default)]
    required_options: Vec<OptionId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionalPayload {
    customer_segment: Option<String>,
    selected_options: Option<BTreeMap<OptionId, ValueId>>,
}

impl TryFrom<PricingRuleRecord> for PricingRule {
    type Error = DomainError;

    fn try_from(record: PricingRuleRecord) -> Result<Self, Self::Error> {
        let rule_id = record.id.0.as_str();

        let condition = match record.rule_type.trim() {
            "volume_discount" => {
                let payload: VolumePayload =
                    decode_section(rule_id, "conditions", &record.conditions)?;
                PricingCondition::VolumeDiscount { min_quantity: payload.min_quantity }
            }
            "time_based" => PricingCondition::TimeBased,
            "bundle" => {
                let payload: BundlePayload =
                    decode_section(rule_id, "conditions", &record.conditions)?;
                PricingCondition::Bundle { required_options: payload.required_options }
            }
            "conditional" => {
                let payload: ConditionalPayload =
                    decode_section(rule_id, "conditions", &record.conditions)?;
                PricingCondition::Conditional {
                    customer_segment: payload.customer_segment,
                    selected_options: payload.selected_options,
                }
            }
            other => {
                return Err(DomainError::MalformedRule {
                    rule_id: rule_id.to_owned(),
                    reason: format!("unknown pricing rule type `{other}`"),
                })
            }
        };

        let discount_type = match record.discount_type.trim() {
            "percentage" => DiscountType::Percentage,
            "fixed_amount" => DiscountType::FixedAmount,
            other => {
                return Err(DomainError::MalformedRule {
                    rule_id: rule_id.to_owned(),
                    reason: format!("unknown discount type `{other}`"),
                })
            }
        };

        if let (Some(from), Some(until)) = (record.valid_from, record.valid_until) {
            if from > until {
                return Err(DomainError::MalformedRule {
                    rule_id: rule_id.to_owned(),
                    reason: "valid_from is after valid_until".to_owned(),
                });
            }
        }

        let discount_value = decimal_or_zero(&record.discount_value);
        let in_range = match discount_type {
            DiscountType::Percentage => {
                (Decimal::ZERO..=Decimal::ONE_HUNDRED).contains(&discount_value)
            }
            DiscountType::FixedAmount => discount_value >= Decimal::ZERO,
        };
        if !in_range {
            return Err(DomainError::MalformedRule {
                rule_id: rule_id.to_owned(),
                reason: format!("discount value {discount_value} is out of range"),
            });
        }

        Ok(Self {
            discount_value,
            id: record.id,
            product_id: record.product_id,
            name: record.name,
            description: record.description,
            sequence: record.sequence,
            condition,
            discount_type,
            min_quantity: record.min_quantity,
            valid_from: record.valid_from,
            valid_until: record.valid_until,
            active: record.active,
        })
    }
}

fn default_min_quantity() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::payload::{decode_section, lenient_decimal};
use crate::domain::product::{OptionId, ProductId, ValueId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub String);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConditions {
    #[serde(default)]
    pub selected_options: BTreeMap<OptionId, ValueId>,
    /// Compared against the product category name.
    #[serde(default)]
    pub product_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Dependency { required_option: OptionId },
    Restriction { restricted_options: Vec<OptionId> },
    AutoSelect { option: OptionId, value: ValueId },
    Pricing { price_modifier: Decimal },
}

impl RuleAction {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Dependency { .. } => "dependency",
            Self::Restriction { .. } => "restriction",
            Self::AutoSelect { .. } => "auto_select",
            Self::Pricing { .. } => "pricing",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRule {
    pub id: RuleId,
    pub product_id: ProductId,
    pub name: String,
    pub priority: i32,
    pub active: bool,
    pub conditions: RuleConditions,
    pub action: RuleAction,
}

/// A rule as stored: a type tag plus free-form condition and action payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRuleRecord {
    pub id: RuleId,
    pub product_id: ProductId,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub conditions: Value,
    #[serde(default)]
    pub actions: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DependencyPayload {
    required_option: Option<OptionId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RestrictionPayload {
    #[serde(default)]
    restricted_options: Vec<OptionId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AutoSelectPayload {
    auto_select_option: Option<OptionId>,
    auto_select_value: Option<ValueId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PricingPayload {
    #[serde(default, deserialize_with = "lenient_decimal")]
    price_modifier: Decimal,
}

impl TryFrom<ConfigurationRuleRecord> for ConfigurationRule {
    type Error = DomainError;

    fn try_from(record: ConfigurationRuleRecord) -> Result<Self, Self::Error> {
        let rule_id = record.id.0.as_str();
        let conditions: RuleConditions = decode_section(rule_id, "conditions", &record.conditions)?;

        let action = match record.rule_type.trim() {
            "dependency" => {
                let payload: DependencyPayload =
                    decode_section(rule_id, "actions", &record.actions)?;
                let required_option = payload
                    .required_option
                    .ok_or_else(|| malformed(rule_id, "dependency requires `required_option`"))?;
                RuleAction::Dependency { required_option }
            }
            "restriction" => {
                let payload: RestrictionPayload =
                    decode_section(rule_id, "actions", &record.actions)?;
                RuleAction::Restriction { restricted_options: payload.restricted_options }
            }
            "auto_select" => {
                let payload: AutoSelectPayload =
                    decode_section(rule_id, "actions", &record.actions)?;
                match (payload.auto_select_option, payload.auto_select_value) {
                    (Some(option), Some(value)) => RuleAction::AutoSelect { option, value },
                    _ => {
                        return Err(malformed(
                            rule_id,
                            "auto_select requires `auto_select_option` and `auto_select_value`",
                        ))
                    }
                }
            }
            "pricing" => {
                let payload: PricingPayload = decode_section(rule_id, "actions", &record.actions)?;
                RuleAction::Pricing { price_modifier: payload.price_modifier }
            }
            other => return Err(malformed(rule_id, &format!("unknown rule type `{other}`"))),
        };

        Ok(Self {
            id: record.id,
            product_id: record.product_id,
            name: record.name,
            priority: record.priority,
            active: record.active,
            conditions,
            action,
        })
    }
}

fn malformed(rule_id: &str, reason: &str) -> DomainError {
    DomainError::MalformedRule { rule_id: rule_id.to_owned(), reason: reason.to_owned() }
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{ConfigurationRule, ConfigurationRuleRecord, RuleAction, RuleId};
    use crate::domain::product::{OptionId, ProductId};
    use crate::errors::DomainError;

    fn record(rule_type: &str, conditions: serde_json::Value, actions: serde_json::Value) -> ConfigurationRuleRecord {
        ConfigurationRuleRecord {
            id: RuleId("r-1".to_owned()),
            product_id: ProductId::from("ws"),
            name: "Rule".to_owned(),
            rule_type: rule_type.to_owned(),
            conditions,
            actions,
            priority: 10,
            active: true,
        }
    }

    #[test]
    fn decodes_each_rule_type_into_its_action_variant() {
        let restriction = ConfigurationRule::try_from(record(
            "restriction",
            json!({"selected_options": {"memory": "8GB"}}),
            json!({"restricted_options": ["gpu"]}),
        ))
        .expect("restriction");
        assert_eq!(
            restriction.action,
            RuleAction::Restriction { restricted_options: vec![OptionId::from("gpu")] }
        );
        assert_eq!(restriction.conditions.selected_options.len(), 1);

        let auto = ConfigurationRule::try_from(record(
            "auto_select",
            json!(null),
            json!({"auto_select_option": "cooling", "auto_select_value": "liquid"}),
        ))
        .expect("auto_select");
        assert_eq!(auto.action.type_name(), "auto_select");
        assert!(auto.conditions.selected_options.is_empty());
    }

    #[test]
    fn pricing_modifier_that_is_not_a_number_counts_as_zero() {
        let rule = ConfigurationRule::try_from(record(
            "pricing",
            json!({}),
            json!({"price_modifier": "not-a-number"}),
        ))
        .expect("pricing");
        assert_eq!(rule.action, RuleAction::Pricing { price_modifier: Decimal::ZERO });

        let missing = ConfigurationRule::try_from(record("pricing", json!({}), json!({})))
            .expect("pricing without modifier");
        assert_eq!(missing.action, RuleAction::Pricing { price_modifier: Decimal::ZERO });
    }

    #[test]
    fn unknown_types_and_bad_payloads_are_malformed() {
        let unknown = ConfigurationRule::try_from(record("teleport", json!({}), json!({})))
            .expect_err("unknown type");
        assert!(matches!(unknown, DomainError::MalformedRule { ref reason, .. } if reason.contains("teleport")));

        let bad_conditions = ConfigurationRule::try_from(record(
            "restriction",
            json!({"selected_options": ["memory"]}),
            json!({"restricted_options": ["gpu"]}),
        ))
        .expect_err("conditions must be a map");
        assert!(matches!(bad_conditions, DomainError::MalformedRule { ref reason, .. } if reason.contains("conditions")));

        let missing_target = ConfigurationRule::try_from(record("dependency", json!({}), json!({})))
            .expect_err("dependency without target");
        assert!(matches!(missing_target, DomainError::MalformedRule { .. }));
    }

    #[test]
    fn unknown_payload_keys_are_malformed() {
        let camel_case = ConfigurationRule::try_from(record(
            "restriction",
            json!({"selectedOptions": {"memory": "8GB"}}),
            json!({"restricted_options": ["gpu"]}),
        ))
        .expect_err("camelCase condition key");
        assert!(matches!(camel_case, DomainError::MalformedRule { ref reason, .. } if reason.contains("conditions")));

        let typo = ConfigurationRule::try_from(record(
            "restriction",
            json!({"selected_options": {"memory": "8GB"}}),
            json!({"restricted_option": ["gpu"]}),
        ))
        .expect_err("misspelled action key");
        assert!(matches!(typo, DomainError::MalformedRule { ref reason, .. } if reason.contains("actions")));
    }
}

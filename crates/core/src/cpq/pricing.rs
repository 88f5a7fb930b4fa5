use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cpq::demand::{DemandContext, DemandModel, TimeOfDayDemand};
use crate::domain::pricing_rule::{DiscountType, PricingCondition, PricingRule, PricingRuleRecord};
use crate::domain::product::{Product, ProductId};
use crate::domain::selection::Selection;
use crate::errors::PricingRuleLoadError;
use crate::repository::PricingRuleRepository;

pub const BASE_PRICE_LABEL: &str = "Base Price";
pub const DYNAMIC_PRICING_LABEL: &str = "Dynamic Pricing";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceContext<'a> {
    pub base_price: Decimal,
    pub selection: &'a Selection,
    pub quantity: u32,
    pub product: &'a Product,
    pub customer_segment: Option<&'a str>,
    pub evaluated_at: DateTime<FixedOffset>,
}

impl<'a> PriceContext<'a> {
    pub fn new(product: &'a Product, selection: &'a Selection, quantity: u32) -> Self {
        Self {
            base_price: product.base_price,
            selection,
            quantity,
            product,
            customer_segment: None,
            evaluated_at: Local::now().into(),
        }
    }

    pub fn with_customer_segment(mut self, customer_segment: Option<&'a str>) -> Self {
        self.customer_segment = customer_segment;
        self
    }

    pub fn at(mut self, evaluated_at: DateTime<FixedOffset>) -> Self {
        self.evaluated_at = evaluated_at;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Percentage,
    FixedAmount,
    Surcharge,
    Discount,
}

impl From<DiscountType> for AdjustmentKind {
    fn from(value: DiscountType) -> Self {
        match value {
            DiscountType::Percentage => Self::Percentage,
            DiscountType::FixedAmount => Self::FixedAmount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub rule: String,
    pub kind: AdjustmentKind,
    pub amount: Decimal,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownLine {
    pub label: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingResult {
    pub original_price: Decimal,
    pub final_price: Decimal,
    pub discounts: Vec<AppliedDiscount>,
    pub breakdown: Vec<BreakdownLine>,
}

impl PricingResult {
    pub fn discount_total(&self) -> Decimal {
        self.discounts
            .iter()
            .fold(Decimal::ZERO, |total, discount| match discount.kind {
                AdjustmentKind::Surcharge => total.saturating_sub(discount.amount),
                _ => total.saturating_add(discount.amount),
            })
    }
}

/// Prices a configured product from its base price, option modifiers, a
/// sequence of compounding discount rules and a demand adjustment.
#[derive(Clone, Debug)]
pub struct PricingEngine {
    rules: Vec<PricingRule>,
    demand: Arc<dyn DemandModel>,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new(Arc::new(TimeOfDayDemand::default()))
    }
}

impl PricingEngine {
    pub fn new(demand: Arc<dyn DemandModel>) -> Self {
        Self { rules: Vec::new(), demand }
    }

    pub fn with_rules(mut self, rules: Vec<PricingRule>) -> Self {
        self.rules = order_rules(rules);
        self
    }

    pub fn rules(&self) -> &[PricingRule] {
        &self.rules
    }

    /// Replaces the rule set with the product's active pricing rules. A failed
    /// fetch leaves no discounts in place rather than blocking price display.
    pub async fn load(
        &mut self,
        repository: &dyn PricingRuleRepository,
        product_id: &ProductId,
    ) -> Result<usize, PricingRuleLoadError> {
        match repository.active_pricing_rules(product_id).await {
            Ok(records) => {
                let total = records.len();
                self.rules = order_rules(decode_pricing_rules(records));
                info!(
                    event_name = "engine.pricing.loaded",
                    product_id = %product_id,
                    loaded = self.rules.len(),
                    skipped = total - self.rules.len(),
                    "pricing rules loaded"
                );
                Ok(self.rules.len())
            }
            Err(source) => {
                self.rules.clear();
                warn!(
                    event_name = "engine.pricing.load_failed",
                    product_id = %product_id,
                    error = %source,
                    "pricing rules unavailable, pricing without discounts"
                );
                Err(PricingRuleLoadError { product_id: product_id.0.clone(), source })
            }
        }
    }

    pub fn applicable_rules(&self, context: &PriceContext<'_>) -> Vec<&PricingRule> {
        let now = context.evaluated_at.with_timezone(&Utc);
        self.rules.iter().filter(|rule| is_applicable(rule, context, now)).collect()
    }

    pub fn calculate_price(&self, context: &PriceContext<'_>) -> PricingResult {
        let quantity = Decimal::from(context.quantity);
        let base_total = saturating_product(context.base_price, quantity);
        let mut breakdown =
            vec![BreakdownLine { label: BASE_PRICE_LABEL.to_owned(), amount: base_total }];

        let mut option_total = Decimal::ZERO;
        for (option_id, value_id) in context.selection.iter() {
            let Some(value) = context.product.value(option_id, value_id) else {
                debug!(
                    option_id = %option_id,
                    value_id = %value_id,
                    "selected value not in catalog, no modifier applied"
                );
                continue;
            };
            if value.price_modifier.is_zero() {
                continue;
            }
            let line_amount = saturating_product(value.price_modifier, quantity);
            option_total = option_total.saturating_add(line_amount);
            breakdown.push(BreakdownLine { label: value.name.clone(), amount: line_amount });
        }

        let original_price = base_total.saturating_add(option_total);
        let mut price = original_price;
        let mut discounts = Vec::new();

        for rule in self.applicable_rules(context) {
            let Some((amount, discounted)) = apply_discount(rule, price) else {
                warn!(
                    event_name = "engine.pricing.skipped_overflow",
                    rule_id = %rule.id,
                    "discount amount out of range, rule skipped"
                );
                continue;
            };
            discounts.push(AppliedDiscount {
                rule: rule.name.clone(),
                kind: rule.discount_type.into(),
                amount,
                description: describe(rule),
            });
            price = discounted;
        }

        let demand_context = DemandContext {
            base_price: context.base_price,
            quantity: context.quantity,
            evaluated_at: context.evaluated_at,
        };
        if let Some(delta) = self.demand.adjustment(&demand_context) {
            match price.checked_add(delta) {
                Some(adjusted) => {
                    discounts.push(AppliedDiscount {
                        rule: DYNAMIC_PRICING_LABEL.to_owned(),
                        kind: if delta >= Decimal::ZERO {
                            AdjustmentKind::Surcharge
                        } else {
                            AdjustmentKind::Discount
                        },
                        amount: delta.abs(),
                        description: "Time and demand based adjustment".to_owned(),
                    });
                    price = adjusted;
                }
                None => warn!(
                    event_name = "engine.pricing.skipped_overflow",
                    "dynamic pricing delta out of range, adjustment skipped"
                ),
            }
        }

        PricingResult {
            original_price,
            final_price: price.max(Decimal::ZERO),
            discounts,
            breakdown,
        }
    }
}

/// Discount amount and the price left after it, or `None` when either falls
/// outside the decimal range.
fn apply_discount(rule: &PricingRule, price: Decimal) -> Option<(Decimal, Decimal)> {
    let amount = match rule.discount_type {
        DiscountType::Percentage => {
            price.checked_mul(rule.discount_value.checked_div(Decimal::ONE_HUNDRED)?)?
        }
        DiscountType::FixedAmount => rule.discount_value,
    };
    Some((amount, price.checked_sub(amount)?))
}

/// Multiplies, saturating at the decimal bounds on overflow.
fn saturating_product(amount: Decimal, quantity: Decimal) -> Decimal {
    amount.checked_mul(quantity).unwrap_or_else(|| {
        warn!(
            event_name = "engine.pricing.saturated",
            amount = %amount,
            quantity = %quantity,
            "price line out of range, saturating"
        );
        if amount.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }
    })
}

pub fn decode_pricing_rules(records: Vec<PricingRuleRecord>) -> Vec<PricingRule> {
    records
        .into_iter()
        .filter_map(|record| {
            let rule_id = record.id.clone();
            match PricingRule::try_from(record) {
                Ok(rule) => Some(rule),
                Err(error) => {
                    warn!(
                        event_name = "engine.pricing.skipped_malformed",
                        rule_id = %rule_id,
                        error = %error,
                        "skipping malformed pricing rule"
                    );
                    None
                }
            }
        })
        .collect()
}

fn order_rules(rules: Vec<PricingRule>) -> Vec<PricingRule> {
    let mut rules = rules.into_iter().filter(|rule| rule.active).collect::<Vec<_>>();
    rules.sort_by(|left, right| {
        left.sequence.cmp(&right.sequence).then_with(|| left.id.cmp(&right.id))
    });
    rules
}

fn is_applicable(rule: &PricingRule, context: &PriceContext<'_>, now: DateTime<Utc>) -> bool {
    if !rule.is_valid_at(now) || context.quantity < rule.min_quantity {
        return false;
    }

    match &rule.condition {
        PricingCondition::VolumeDiscount { min_quantity } => {
            context.quantity >= min_quantity.unwrap_or(rule.min_quantity)
        }
        PricingCondition::Bundle { required_options } => {
            required_options.iter().all(|option_id| context.selection.contains(option_id))
        }
        PricingCondition::Conditional { customer_segment, selected_options } => {
            let segment_matches = customer_segment
                .as_deref()
                .map_or(true, |segment| context.customer_segment == Some(segment));
            let options_match = selected_options
                .as_ref()
                .map_or(true, |required| context.selection.matches_all(required));
            segment_matches && options_match
        }
        PricingCondition::TimeBased => true,
    }
}

fn describe(rule: &PricingRule) -> String {
    if let Some(description) = rule.description.as_deref().filter(|text| !text.trim().is_empty()) {
        return description.to_owned();
    }

    match rule.discount_type {
        DiscountType::Percentage => format!("{}% off", rule.discount_value.normalize()),
        DiscountType::FixedAmount => format!("{} off", rule.discount_value.normalize()),
    }
}

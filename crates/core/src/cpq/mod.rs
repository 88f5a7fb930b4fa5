pub mod demand;
pub mod pricing;
pub mod rules;

#[cfg(test)]
pub(crate) mod fixtures;

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::Product;
use crate::domain::selection::Selection;

use self::{
    pricing::{BreakdownLine, PriceContext, PricingEngine, PricingResult},
    rules::{EvaluationResult, RuleEngine},
};

pub const RULES_ADJUSTMENT_LABEL: &str = "Configuration Rules Adjustment";

#[derive(Clone, Debug)]
pub struct ConfiguratorInput<'a> {
    pub product: &'a Product,
    pub selection: &'a Selection,
    pub quantity: u32,
    pub customer_segment: Option<&'a str>,
    pub evaluated_at: Option<DateTime<FixedOffset>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguratorEvaluation {
    pub evaluation: EvaluationResult,
    pub pricing: PricingResult,
}

/// Runs the rule engine and then prices the selection the rules left behind.
/// A non-zero rule price adjustment becomes its own breakdown line and is
/// folded into the final price.
#[derive(Clone, Debug, Default)]
pub struct ConfiguratorRuntime {
    pub rules: RuleEngine,
    pub pricing: PricingEngine,
}

impl ConfiguratorRuntime {
    pub fn new(rules: RuleEngine, pricing: PricingEngine) -> Self {
        Self { rules, pricing }
    }

    pub fn evaluate(&self, input: ConfiguratorInput<'_>) -> ConfiguratorEvaluation {
        let evaluation = self.rules.evaluate(input.selection, input.product);

        let mut context =
            PriceContext::new(input.product, &evaluation.validated_options, input.quantity)
                .with_customer_segment(input.customer_segment);
        if let Some(evaluated_at) = input.evaluated_at {
            context = context.at(evaluated_at);
        }
        let mut pricing = self.pricing.calculate_price(&context);

        if !evaluation.price_adjustment.is_zero() {
            pricing.breakdown.push(BreakdownLine {
                label: RULES_ADJUSTMENT_LABEL.to_owned(),
                amount: evaluation.price_adjustment,
            });
            pricing.final_price = pricing
                .final_price
                .saturating_add(evaluation.price_adjustment)
                .max(Decimal::ZERO);
        }

        ConfiguratorEvaluation { evaluation, pricing }
    }
}

//! Server-side re-validation of a submitted configuration.
//!
//! Nothing in a [`ConfigurationSubmission`] is trusted. Rules and pricing
//! rules are loaded fresh, both evaluations are recomputed, and any
//! disagreement is a hard rejection. Unlike interactive sessions, a failed
//! rule load fails the checkout.

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{info, warn};

use crate::cpq::pricing::PricingEngine;
use crate::cpq::rules::RuleEngine;
use crate::cpq::{ConfiguratorInput, ConfiguratorRuntime};
use crate::domain::configuration::{
    ConfigurationId, ConfigurationSubmission, VerifiedConfiguration,
};
use crate::domain::product::Product;
use crate::errors::{ApplicationError, DomainError};
use crate::repository::{
    CatalogRepository, ConfigurationStore, InventoryChecker, PricingRuleRepository,
    RuleRepository,
};
use crate::session::SessionSettings;

/// Decimal places compared when matching the submitted price.
pub const PRICE_SCALE: u32 = 2;

pub struct CheckoutVerifier<'a> {
    catalog: &'a dyn CatalogRepository,
    rules: &'a dyn RuleRepository,
    pricing: &'a dyn PricingRuleRepository,
    inventory: &'a dyn InventoryChecker,
    store: &'a dyn ConfigurationStore,
    settings: SessionSettings,
    evaluated_at: Option<DateTime<FixedOffset>>,
}

impl<'a> CheckoutVerifier<'a> {
    pub fn new(
        catalog: &'a dyn CatalogRepository,
        rules: &'a dyn RuleRepository,
        pricing: &'a dyn PricingRuleRepository,
        inventory: &'a dyn InventoryChecker,
        store: &'a dyn ConfigurationStore,
        settings: SessionSettings,
    ) -> Self {
        Self { catalog, rules, pricing, inventory, store, settings, evaluated_at: None }
    }

    pub fn at(mut self, evaluated_at: DateTime<FixedOffset>) -> Self {
        self.evaluated_at = Some(evaluated_at);
        self
    }

    pub async fn verify(
        &self,
        submission: &ConfigurationSubmission,
    ) -> Result<VerifiedConfiguration, ApplicationError> {
        let result = self.recompute(submission).await;
        if let Err(error) = &result {
            warn!(
                event_name = "session.checkout.rejected",
                product_id = %submission.product_id,
                error = %error,
                "checkout rejected"
            );
        }
        result
    }

    pub async fn verify_and_save(
        &self,
        submission: &ConfigurationSubmission,
    ) -> Result<ConfigurationId, ApplicationError> {
        let verified = self.verify(submission).await?;
        let final_price = verified.final_price;
        let configuration_id = self.store.save(verified).await?;
        info!(
            event_name = "session.checkout.saved",
            configuration_id = %configuration_id,
            product_id = %submission.product_id,
            final_price = %final_price,
            "configuration verified and saved"
        );
        Ok(configuration_id)
    }

    async fn recompute(
        &self,
        submission: &ConfigurationSubmission,
    ) -> Result<VerifiedConfiguration, ApplicationError> {
        if submission.quantity == 0 {
            return Err(DomainError::InvalidQuantity(submission.quantity).into());
        }

        let product = self
            .catalog
            .product_with_options(&submission.product_id)
            .await?
            .ok_or_else(|| DomainError::ProductNotFound(submission.product_id.0.clone()))?;
        check_selection_shape(&product, submission)?;

        let mut rules = RuleEngine::default().with_max_passes(self.settings.max_passes);
        rules.load(self.rules, &product.id).await?;
        let mut pricing = PricingEngine::new(self.settings.demand.clone());
        pricing.load(self.pricing, &product.id).await?;
        let runtime = ConfiguratorRuntime::new(rules, pricing);

        let computed = runtime.evaluate(ConfiguratorInput {
            product: &product,
            selection: &submission.selection,
            quantity: submission.quantity,
            customer_segment: submission.customer_segment.as_deref(),
            evaluated_at: self.evaluated_at,
        });

        if !computed.evaluation.restrictions.is_empty()
            || computed.evaluation.validated_options != submission.selection
        {
            let mut restrictions = computed.evaluation.restrictions;
            if restrictions.is_empty() {
                restrictions.push("selection was pruned by configuration rules".to_owned());
            }
            return Err(DomainError::ConfigurationInvalid { restrictions }.into());
        }

        let final_price = computed.pricing.final_price.round_dp(PRICE_SCALE);
        if submission.submitted_price.round_dp(PRICE_SCALE) != final_price {
            return Err(DomainError::PriceMismatch {
                submitted: submission.submitted_price,
                computed: final_price,
            }
            .into());
        }

        self.check_inventory(&product, submission).await?;

        Ok(VerifiedConfiguration {
            product_id: product.id.clone(),
            selection_fingerprint: submission.selection.fingerprint(),
            selection: submission.selection.clone(),
            quantity: submission.quantity,
            customer_segment: submission.customer_segment.clone(),
            final_price,
            verified_at: Utc::now(),
        })
    }

    /// A value is short when the catalog marks it unavailable or the
    /// inventory checker does not confirm it.
    async fn check_inventory(
        &self,
        product: &Product,
        submission: &ConfigurationSubmission,
    ) -> Result<(), ApplicationError> {
        let value_ids =
            submission.selection.iter().map(|(_, value)| value.clone()).collect::<Vec<_>>();
        if value_ids.is_empty() {
            return Ok(());
        }
        let stock = self.inventory.check_availability(&value_ids).await?;

        let short = submission
            .selection
            .iter()
            .filter(|(option_id, value_id)| {
                let listed = product
                    .value(option_id, value_id)
                    .map(|value| value.available)
                    .unwrap_or(false);
                !listed || !stock.get(*value_id).copied().unwrap_or(false)
            })
            .map(|(_, value_id)| value_id.0.clone())
            .collect::<Vec<_>>();

        if short.is_empty() {
            Ok(())
        } else {
            Err(DomainError::InsufficientInventory { value_ids: short }.into())
        }
    }
}

fn check_selection_shape(
    product: &Product,
    submission: &ConfigurationSubmission,
) -> Result<(), DomainError> {
    for (option_id, value_id) in submission.selection.iter() {
        let Some(option) = product.option(option_id) else {
            return Err(DomainError::UnknownOption {
                product_id: product.id.0.clone(),
                option_id: option_id.0.clone(),
            });
        };
        if option.value(value_id).is_none() {
            return Err(DomainError::UnknownValue {
                option_id: option_id.0.clone(),
                value_id: value_id.0.clone(),
            });
        }
    }
    Ok(())
}

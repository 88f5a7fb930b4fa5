//! One shopper configuring one product.
//!
//! A session owns its own engines with the rule snapshot loaded at start, so
//! concurrent sessions never share mutable engine state. Every change re-runs
//! rule evaluation and pricing; suggested auto-selections are surfaced and
//! only applied through [`ConfigurationSession::accept_auto_selections`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::cpq::demand::{demand_model_from_config, DemandModel, TimeOfDayDemand};
use crate::cpq::pricing::{PricingEngine, PricingResult};
use crate::cpq::rules::{RuleEngine, DEFAULT_MAX_PASSES};
use crate::cpq::{ConfiguratorEvaluation, ConfiguratorInput, ConfiguratorRuntime};
use crate::domain::configuration::{ConfigurationId, ConfigurationSubmission};
use crate::domain::product::{OptionId, Product, ProductId, ValueId};
use crate::domain::selection::Selection;
use crate::errors::{ApplicationError, DomainError};
use crate::repository::{CatalogRepository, PricingRuleRepository, RuleRepository};
use crate::tracker::{SessionTracker, TrackerEventKind};

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub max_passes: usize,
    pub demand: Arc<dyn DemandModel>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { max_passes: DEFAULT_MAX_PASSES, demand: Arc::new(TimeOfDayDemand::default()) }
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_passes: config.engine.max_passes,
            demand: demand_model_from_config(&config.pricing),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub product_id: ProductId,
    pub selection: Selection,
    pub validated_options: Selection,
    pub restrictions: Vec<String>,
    pub auto_selections: BTreeMap<OptionId, ValueId>,
    pub quantity: u32,
    pub customer_segment: Option<String>,
    pub pricing: PricingResult,
    pub load_warnings: Vec<String>,
}

impl SessionSnapshot {
    pub fn degraded(&self) -> bool {
        !self.load_warnings.is_empty()
    }
}

#[derive(Debug)]
pub struct ConfigurationSession {
    id: String,
    product: Product,
    runtime: ConfiguratorRuntime,
    selection: Selection,
    quantity: u32,
    customer_segment: Option<String>,
    evaluated_at: Option<DateTime<FixedOffset>>,
    load_warnings: Vec<String>,
    tracker: Option<Arc<SessionTracker>>,
    current: ConfiguratorEvaluation,
}

impl ConfigurationSession {
    /// Fetches the product and loads both rule sets.
    ///
    /// A missing product is an error. Rule or pricing-rule load failures are
    /// not: the session runs unconstrained or undiscounted and records the
    /// failure in `load_warnings`.
    pub async fn start(
        catalog: &dyn CatalogRepository,
        rules: &dyn RuleRepository,
        pricing: &dyn PricingRuleRepository,
        product_id: &ProductId,
        settings: SessionSettings,
    ) -> Result<Self, ApplicationError> {
        let product = catalog
            .product_with_options(product_id)
            .await?
            .ok_or_else(|| DomainError::ProductNotFound(product_id.0.clone()))?;

        let mut load_warnings = Vec::new();
        let mut rule_engine = RuleEngine::default().with_max_passes(settings.max_passes);
        if let Err(error) = rule_engine.load(rules, product_id).await {
            load_warnings.push(error.to_string());
        }
        let mut pricing_engine = PricingEngine::new(settings.demand);
        if let Err(error) = pricing_engine.load(pricing, product_id).await {
            load_warnings.push(error.to_string());
        }

        let runtime = ConfiguratorRuntime::new(rule_engine, pricing_engine);
        let mut session = Self {
            id: format!("SES-{}", Uuid::new_v4()),
            product,
            current: ConfiguratorEvaluation::default(),
            runtime,
            selection: Selection::new(),
            quantity: 1,
            customer_segment: None,
            evaluated_at: None,
            load_warnings,
            tracker: None,
        };
        session.refresh();

        info!(
            event_name = "session.started",
            session_id = %session.id,
            product_id = %session.product.id,
            rules = session.runtime.rules.rules().len(),
            pricing_rules = session.runtime.pricing.rules().len(),
            degraded = !session.load_warnings.is_empty(),
            "configuration session started"
        );
        Ok(session)
    }

    pub fn with_tracker(mut self, tracker: Arc<SessionTracker>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("product_id".to_owned(), self.product.id.0.clone());
        tracker.record(&self.id, TrackerEventKind::SessionStarted, metadata);
        self.tracker = Some(tracker);
        self
    }

    /// Pins the timestamp used for validity windows and the demand term.
    pub fn pinned_at(mut self, evaluated_at: DateTime<FixedOffset>) -> Self {
        self.evaluated_at = Some(evaluated_at);
        self.refresh();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn runtime(&self) -> &ConfiguratorRuntime {
        &self.runtime
    }

    pub fn select(
        &mut self,
        option_id: OptionId,
        value_id: ValueId,
    ) -> Result<SessionSnapshot, DomainError> {
        let Some(option) = self.product.option(&option_id) else {
            return Err(DomainError::UnknownOption {
                product_id: self.product.id.0.clone(),
                option_id: option_id.0,
            });
        };
        if option.value(&value_id).is_none() {
            return Err(DomainError::UnknownValue { option_id: option_id.0, value_id: value_id.0 });
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("option_id".to_owned(), option_id.0.clone());
        metadata.insert("value_id".to_owned(), value_id.0.clone());
        self.selection.insert(option_id, value_id);
        self.track(TrackerEventKind::OptionSelected, metadata);
        self.refresh();
        Ok(self.snapshot())
    }

    pub fn deselect(&mut self, option_id: &OptionId) -> SessionSnapshot {
        if let Some(value_id) = self.selection.remove(option_id) {
            let mut metadata = BTreeMap::new();
            metadata.insert("option_id".to_owned(), option_id.0.clone());
            metadata.insert("value_id".to_owned(), value_id.0);
            self.track(TrackerEventKind::OptionRemoved, metadata);
            self.refresh();
        }
        self.snapshot()
    }

    pub fn set_quantity(&mut self, quantity: u32) -> Result<SessionSnapshot, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        if quantity != self.quantity {
            let mut metadata = BTreeMap::new();
            metadata.insert("from".to_owned(), self.quantity.to_string());
            metadata.insert("to".to_owned(), quantity.to_string());
            self.quantity = quantity;
            self.track(TrackerEventKind::QuantityChanged, metadata);
            self.refresh();
        }
        Ok(self.snapshot())
    }

    pub fn set_customer_segment(&mut self, customer_segment: Option<String>) -> SessionSnapshot {
        self.customer_segment = customer_segment.filter(|segment| !segment.trim().is_empty());
        self.refresh();
        self.snapshot()
    }

    /// Applies the currently suggested auto-selections to the selection.
    /// Returns how many options were filled in.
    pub fn accept_auto_selections(&mut self) -> usize {
        let suggestions = self.current.evaluation.auto_selections.clone();
        let mut accepted = 0;
        for (option_id, value_id) in suggestions {
            if self.selection.contains(&option_id) {
                continue;
            }
            let mut metadata = BTreeMap::new();
            metadata.insert("option_id".to_owned(), option_id.0.clone());
            metadata.insert("value_id".to_owned(), value_id.0.clone());
            self.selection.insert(option_id, value_id);
            self.track(TrackerEventKind::AutoSelectionAccepted, metadata);
            accepted += 1;
        }
        if accepted > 0 {
            self.refresh();
        }
        accepted
    }

    pub fn available_values(&self) -> BTreeMap<OptionId, Vec<ValueId>> {
        self.runtime.rules.available_values_by_option(&self.selection, &self.product)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            product_id: self.product.id.clone(),
            selection: self.selection.clone(),
            validated_options: self.current.evaluation.validated_options.clone(),
            restrictions: self.current.evaluation.restrictions.clone(),
            auto_selections: self.current.evaluation.auto_selections.clone(),
            quantity: self.quantity,
            customer_segment: self.customer_segment.clone(),
            pricing: self.current.pricing.clone(),
            load_warnings: self.load_warnings.clone(),
        }
    }

    /// The selection and displayed price, in the shape the checkout path
    /// re-verifies.
    pub fn submission(&self) -> ConfigurationSubmission {
        ConfigurationSubmission {
            product_id: self.product.id.clone(),
            selection: self.selection.clone(),
            quantity: self.quantity,
            customer_segment: self.customer_segment.clone(),
            submitted_price: self.current.pricing.final_price,
        }
    }

    /// Records that checkout accepted this session's configuration.
    pub fn mark_saved(&self, configuration_id: &ConfigurationId) {
        let mut metadata = BTreeMap::new();
        metadata.insert("configuration_id".to_owned(), configuration_id.0.clone());
        metadata.insert("final_price".to_owned(), self.current.pricing.final_price.to_string());
        self.track(TrackerEventKind::ConfigurationSaved, metadata);
    }

    fn refresh(&mut self) {
        let previous = std::mem::take(&mut self.current.evaluation.restrictions);
        self.current = self.runtime.evaluate(ConfiguratorInput {
            product: &self.product,
            selection: &self.selection,
            quantity: self.quantity,
            customer_segment: self.customer_segment.as_deref(),
            evaluated_at: self.evaluated_at,
        });

        let surfaced = self
            .current
            .evaluation
            .restrictions
            .iter()
            .filter(|message| !previous.contains(message))
            .cloned()
            .collect::<Vec<_>>();
        for message in surfaced {
            warn!(
                event_name = "session.restriction_surfaced",
                session_id = %self.id,
                restriction = %message,
                "selection restricted"
            );
            let mut metadata = BTreeMap::new();
            metadata.insert("message".to_owned(), message);
            self.track(TrackerEventKind::RestrictionSurfaced, metadata);
        }
    }

    fn track(&self, kind: TrackerEventKind, metadata: BTreeMap<String, String>) {
        if let Some(tracker) = &self.tracker {
            tracker.record(&self.id, kind, metadata);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{ConfigurationSession, SessionSettings};
    use crate::cpq::demand::NoDemandAdjustment;
    use crate::cpq::fixtures::workstation;
    use crate::cpq::RULES_ADJUSTMENT_LABEL;
    use crate::domain::configuration::ConfigurationId;
    use crate::domain::pricing_rule::{PricingRuleId, PricingRuleRecord};
    use crate::domain::product::{OptionId, Product, ProductId, ValueId};
    use crate::domain::rule::{ConfigurationRuleRecord, RuleId};
    use crate::errors::{ApplicationError, DomainError, RepositoryError};
    use crate::repository::{CatalogRepository, PricingRuleRepository, RuleRepository};
    use crate::tracker::{
        InMemoryTrackerSink, ManualClock, SessionTracker, TrackerEventKind, TrackerSettings,
    };

    struct Fixture {
        product: Option<Product>,
        rules: Result<Vec<ConfigurationRuleRecord>, RepositoryError>,
        pricing: Result<Vec<PricingRuleRecord>, RepositoryError>,
    }

    #[async_trait]
    impl CatalogRepository for Fixture {
        async fn product_with_options(
            &self,
            _product_id: &ProductId,
        ) -> Result<Option<Product>, RepositoryError> {
            Ok(self.product.clone())
        }
    }

    #[async_trait]
    impl RuleRepository for Fixture {
        async fn active_rules(
            &self,
            _product_id: &ProductId,
        ) -> Result<Vec<ConfigurationRuleRecord>, RepositoryError> {
            self.rules.clone()
        }
    }

    #[async_trait]
    impl PricingRuleRepository for Fixture {
        async fn active_pricing_rules(
            &self,
            _product_id: &ProductId,
        ) -> Result<Vec<PricingRuleRecord>, RepositoryError> {
            self.pricing.clone()
        }
    }

    fn record(
        id: &str,
        rule_type: &str,
        priority: i32,
        conditions: serde_json::Value,
        actions: serde_json::Value,
    ) -> ConfigurationRuleRecord {
        ConfigurationRuleRecord {
            id: RuleId(id.to_owned()),
            product_id: ProductId::from("ws-pro"),
            name: id.to_owned(),
            rule_type: rule_type.to_owned(),
            conditions,
            actions,
            priority,
            active: true,
        }
    }

    fn fixture() -> Fixture {
        Fixture {
            product: Some(workstation()),
            rules: Ok(vec![
                record(
                    "low-mem-gpu",
                    "restriction",
                    20,
                    json!({"selected_options": {"memory": "8GB"}}),
                    json!({"restricted_options": ["gpu"]}),
                ),
                record(
                    "liquid-for-4090",
                    "auto_select",
                    10,
                    json!({"selected_options": {"gpu": "RTX4090"}}),
                    json!({"auto_select_option": "cooling", "auto_select_value": "liquid"}),
                ),
                record(
                    "install-fee",
                    "pricing",
                    1,
                    json!({"selected_options": {"cooling": "liquid"}}),
                    json!({"price_modifier": 60}),
                ),
            ]),
            pricing: Ok(vec![PricingRuleRecord {
                id: PricingRuleId("volume-10".to_owned()),
                product_id: ProductId::from("ws-pro"),
                name: "Volume 10%".to_owned(),
                description: None,
                rule_type: "volume_discount".to_owned(),
                conditions: json!({"min_quantity": 3}),
                discount_type: "percentage".to_owned(),
                discount_value: json!(10),
                min_quantity: 1,
                valid_from: None,
                valid_until: None,
                sequence: 0,
                active: true,
            }]),
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings { max_passes: 1, demand: Arc::new(NoDemandAdjustment) }
    }

    async fn start(fixture: &Fixture) -> Result<ConfigurationSession, ApplicationError> {
        ConfigurationSession::start(fixture, fixture, fixture, &ProductId::from("ws-pro"), settings())
            .await
    }

    #[tokio::test]
    async fn missing_product_is_a_hard_error() {
        let mut fixture = fixture();
        fixture.product = None;
        let error = start(&fixture).await.expect_err("no product");
        assert_eq!(error, ApplicationError::Domain(DomainError::ProductNotFound("ws-pro".to_owned())));
    }

    #[tokio::test]
    async fn rule_load_failure_degrades_instead_of_failing() {
        let mut fixture = fixture();
        fixture.rules = Err(RepositoryError::Storage("connection reset".to_owned()));
        let mut session = start(&fixture).await.expect("session");

        session.select(OptionId::from("memory"), ValueId::from("8GB")).expect("memory");
        let snapshot = session.select(OptionId::from("gpu"), ValueId::from("RTX4080")).expect("gpu");
        assert!(snapshot.degraded());
        assert!(snapshot.restrictions.is_empty(), "no rules means no constraints");
        assert_eq!(snapshot.validated_options.len(), 2);
    }

    #[tokio::test]
    async fn unknown_option_or_value_is_rejected() {
        let fixture = fixture();
        let mut session = start(&fixture).await.expect("session");

        assert!(matches!(
            session.select(OptionId::from("chassis"), ValueId::from("tower")),
            Err(DomainError::UnknownOption { .. })
        ));
        assert!(matches!(
            session.select(OptionId::from("memory"), ValueId::from("1TB")),
            Err(DomainError::UnknownValue { .. })
        ));
        assert!(session.snapshot().selection.is_empty());
        assert!(matches!(session.set_quantity(0), Err(DomainError::InvalidQuantity(0))));
    }

    #[tokio::test]
    async fn restriction_prunes_priced_selection_but_keeps_user_choice() {
        let fixture = fixture();
        let mut session = start(&fixture).await.expect("session");
        session.select(OptionId::from("gpu"), ValueId::from("RTX4080")).expect("gpu");
        let snapshot = session.select(OptionId::from("memory"), ValueId::from("8GB")).expect("memory");

        assert_eq!(snapshot.selection.len(), 2);
        assert!(!snapshot.validated_options.contains(&OptionId::from("gpu")));
        assert_eq!(snapshot.restrictions, vec!["low-mem-gpu: gpu is not available with current selection"]);
        assert_eq!(snapshot.pricing.final_price, Decimal::new(1000, 0));
    }

    #[tokio::test]
    async fn auto_selections_are_surfaced_until_accepted() {
        let fixture = fixture();
        let mut session = start(&fixture).await.expect("session");
        let snapshot = session.select(OptionId::from("gpu"), ValueId::from("RTX4090")).expect("gpu");

        assert_eq!(
            snapshot.auto_selections.get(&OptionId::from("cooling")),
            Some(&ValueId::from("liquid"))
        );
        assert!(!snapshot.selection.contains(&OptionId::from("cooling")));

        assert_eq!(session.accept_auto_selections(), 1);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.selection.get(&OptionId::from("cooling")), Some(&ValueId::from("liquid")));
        assert!(snapshot.auto_selections.is_empty());
        let adjustment = snapshot
            .pricing
            .breakdown
            .iter()
            .find(|line| line.label == RULES_ADJUSTMENT_LABEL)
            .expect("rule adjustment line");
        assert_eq!(adjustment.amount, Decimal::new(60, 0));
        // 1000 + 1200 + 120 + 60
        assert_eq!(snapshot.pricing.final_price, Decimal::new(2380, 0));
    }

    #[tokio::test]
    async fn quantity_change_reprices_with_volume_discount() {
        let fixture = fixture();
        let mut session = start(&fixture).await.expect("session");
        session.select(OptionId::from("memory"), ValueId::from("16GB")).expect("memory");
        let snapshot = session.set_quantity(3).expect("quantity");

        assert_eq!(snapshot.pricing.original_price, Decimal::new(3150, 0));
        assert_eq!(snapshot.pricing.final_price, Decimal::new(2835, 0));
        let submission = session.submission();
        assert_eq!(submission.submitted_price, Decimal::new(2835, 0));
        assert_eq!(submission.quantity, 3);
    }

    #[tokio::test]
    async fn tracker_receives_session_events() {
        let fixture = fixture();
        let sink = InMemoryTrackerSink::default();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()));
        let tracker = Arc::new(SessionTracker::new(clock, Arc::new(sink.clone()), TrackerSettings::default()));
        tracker.start();

        let noon = FixedOffset::east_opt(0)
            .expect("offset")
            .with_ymd_and_hms(2026, 10, 15, 12, 0, 0)
            .single()
            .expect("timestamp");
        let mut session = start(&fixture).await.expect("session").pinned_at(noon).with_tracker(tracker.clone());
        session.select(OptionId::from("gpu"), ValueId::from("RTX4080")).expect("gpu");
        session.select(OptionId::from("memory"), ValueId::from("8GB")).expect("memory");
        session.deselect(&OptionId::from("memory"));
        session.mark_saved(&ConfigurationId("CFG-test".to_owned()));
        tracker.stop().expect("stop");

        let kinds = sink.events().into_iter().map(|event| event.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                TrackerEventKind::SessionStarted,
                TrackerEventKind::OptionSelected,
                TrackerEventKind::OptionSelected,
                TrackerEventKind::RestrictionSurfaced,
                TrackerEventKind::OptionRemoved,
                TrackerEventKind::ConfigurationSaved,
            ]
        );
        let saved = sink.events().pop().expect("saved event");
        assert_eq!(saved.metadata.get("configuration_id").map(String::as_str), Some("CFG-test"));
    }
}

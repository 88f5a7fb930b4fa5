use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::product::{OptionId, Product, ProductId, ValueId};
use crate::domain::rule::{ConfigurationRule, ConfigurationRuleRecord, RuleAction, RuleConditions};
use crate::domain::selection::Selection;
use crate::errors::RuleLoadError;
use crate::repository::RuleRepository;

pub const DEFAULT_MAX_PASSES: usize = 1;
pub const MAX_PASSES_LIMIT: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub validated_options: Selection,
    pub restrictions: Vec<String>,
    pub auto_selections: BTreeMap<OptionId, ValueId>,
    pub price_adjustment: Decimal,
}

#[derive(Default)]
struct PassOutcome {
    restrictions: Vec<String>,
    auto_selections: BTreeMap<OptionId, ValueId>,
    price_adjustment: Decimal,
    removed_any: bool,
}

/// Evaluates a product's configuration rules against a selection.
///
/// Rules are held in evaluation order: priority descending, then rule id
/// ascending. The default is a single pass, so a restriction applied late in
/// the pass can leave the selection in a state an earlier rule would have
/// flagged. Raising `max_passes` repeats the pass while options keep being
/// removed.
#[derive(Clone, Debug)]
pub struct RuleEngine {
    rules: Vec<ConfigurationRule>,
    max_passes: usize,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_rules(Vec::new())
    }
}

impl RuleEngine {
    pub fn with_rules(rules: Vec<ConfigurationRule>) -> Self {
        Self { rules: order_rules(rules), max_passes: DEFAULT_MAX_PASSES }
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.clamp(1, MAX_PASSES_LIMIT);
        self
    }

    pub fn rules(&self) -> &[ConfigurationRule] {
        &self.rules
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    /// Replaces the rule set with the product's active rules.
    ///
    /// On failure the engine is left with no rules and stays usable: the
    /// shopper sees an unconstrained configurator instead of an error page.
    /// Anything accepted this way must be re-validated on checkout.
    pub async fn load(
        &mut self,
        repository: &dyn RuleRepository,
        product_id: &ProductId,
    ) -> Result<usize, RuleLoadError> {
        match repository.active_rules(product_id).await {
            Ok(records) => {
                let total = records.len();
                self.rules = order_rules(decode_rules(records));
                info!(
                    event_name = "engine.rules.loaded",
                    product_id = %product_id,
                    loaded = self.rules.len(),
                    skipped = total - self.rules.len(),
                    "configuration rules loaded"
                );
                Ok(self.rules.len())
            }
            Err(source) => {
                self.rules.clear();
                warn!(
                    event_name = "engine.rules.load_failed",
                    product_id = %product_id,
                    error = %source,
                    "configuration rules unavailable, continuing without constraints"
                );
                Err(RuleLoadError { product_id: product_id.0.clone(), source })
            }
        }
    }

    pub fn evaluate(&self, selection: &Selection, product: &Product) -> EvaluationResult {
        let mut working = selection.clone();
        let mut restrictions: Vec<String> = Vec::new();
        let mut last = PassOutcome::default();

        for pass_index in 0..self.max_passes {
            last = self.run_pass(&mut working, product);
            for message in last.restrictions.drain(..) {
                if pass_index == 0 || !restrictions.contains(&message) {
                    restrictions.push(message);
                }
            }
            if !last.removed_any {
                break;
            }
        }

        EvaluationResult {
            validated_options: working,
            restrictions,
            auto_selections: last.auto_selections,
            price_adjustment: last.price_adjustment,
        }
    }

    /// Values of `option_id` that can be chosen without producing a
    /// restriction. Each candidate is checked against its own trial copy of
    /// the selection; neither the caller's selection nor the rules change.
    pub fn available_values(
        &self,
        selection: &Selection,
        product: &Product,
        option_id: &OptionId,
    ) -> Vec<ValueId> {
        let Some(option) = product.option(option_id) else {
            debug!(option_id = %option_id, product_id = %product.id, "unknown option requested");
            return Vec::new();
        };

        option
            .available_values()
            .into_iter()
            .filter(|value| {
                let mut trial = selection.clone();
                trial.insert(option_id.clone(), value.id.clone());
                self.evaluate(&trial, product).restrictions.is_empty()
            })
            .map(|value| value.id.clone())
            .collect()
    }

    pub fn available_values_by_option(
        &self,
        selection: &Selection,
        product: &Product,
    ) -> BTreeMap<OptionId, Vec<ValueId>> {
        product
            .options
            .iter()
            .map(|option| (option.id.clone(), self.available_values(selection, product, &option.id)))
            .collect()
    }

    fn run_pass(&self, working: &mut Selection, product: &Product) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        for rule in &self.rules {
            if !conditions_match(&rule.conditions, working, product) {
                continue;
            }

            match &rule.action {
                RuleAction::Dependency { required_option } => {
                    if !working.contains(required_option) {
                        outcome
                            .restrictions
                            .push(format!("{}: Please select {}", rule.name, required_option));
                    }
                }
                RuleAction::Restriction { restricted_options } => {
                    for option_id in restricted_options {
                        if working.remove(option_id).is_some() {
                            outcome.restrictions.push(format!(
                                "{}: {} is not available with current selection",
                                rule.name, option_id
                            ));
                            outcome.removed_any = true;
                        }
                    }
                }
                RuleAction::AutoSelect { option, value } => {
                    if !working.contains(option) {
                        outcome.auto_selections.insert(option.clone(), value.clone());
                    }
                }
                RuleAction::Pricing { price_modifier } => {
                    match outcome.price_adjustment.checked_add(*price_modifier) {
                        Some(total) => outcome.price_adjustment = total,
                        None => warn!(
                            event_name = "engine.rules.skipped_overflow",
                            rule_id = %rule.id,
                            "price modifier out of range, rule skipped"
                        ),
                    }
                }
            }
        }

        outcome
    }
}

/// Memoizes `available_values` per selection fingerprint and option.
///
/// Entries are only valid for the rule set and product they were computed
/// with; drop the cache whenever either is reloaded.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    entries: Mutex<HashMap<(String, OptionId), Vec<ValueId>>>,
}

impl AvailabilityCache {
    pub fn available_values(
        &self,
        engine: &RuleEngine,
        selection: &Selection,
        product: &Product,
        option_id: &OptionId,
    ) -> Vec<ValueId> {
        let key = (selection.fingerprint(), option_id.clone());
        if let Some(hit) = self.lock().get(&key) {
            return hit.clone();
        }

        let values = engine.available_values(selection, product, option_id);
        self.lock().insert(key, values.clone());
        values
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, OptionId), Vec<ValueId>>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Decodes stored rules. Malformed records are logged and skipped.
pub fn decode_rules(records: Vec<ConfigurationRuleRecord>) -> Vec<ConfigurationRule> {
    records
        .into_iter()
        .filter_map(|record| {
            let rule_id = record.id.clone();
            match ConfigurationRule::try_from(record) {
                Ok(rule) => Some(rule),
                Err(error) => {
                    warn!(
                        event_name = "engine.rules.skipped_malformed",
                        rule_id = %rule_id,
                        error = %error,
                        "skipping malformed configuration rule"
                    );
                    None
                }
            }
        })
        .collect()
}

fn order_rules(rules: Vec<ConfigurationRule>) -> Vec<ConfigurationRule> {
    let mut rules = rules.into_iter().filter(|rule| rule.active).collect::<Vec<_>>();
    rules.sort_by(|left, right| right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id)));
    rules
}

fn conditions_match(conditions: &RuleConditions, working: &Selection, product: &Product) -> bool {
    if let Some(product_type) = &conditions.product_type {
        if product_type != &product.category {
            return false;
        }
    }

    working.matches_all(&conditions.selected_options)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{decode_rules, AvailabilityCache, RuleEngine};
    use crate::cpq::fixtures::{rule, workstation};
    use crate::domain::product::{OptionId, ProductId, ValueId};
    use crate::domain::rule::{
        ConfigurationRule, ConfigurationRuleRecord, RuleAction, RuleConditions, RuleId,
    };
    use crate::domain::selection::Selection;
    use crate::errors::RepositoryError;
    use crate::repository::RuleRepository;

    fn conditions(pairs: &[(&str, &str)]) -> RuleConditions {
        RuleConditions {
            selected_options: pairs
                .iter()
                .map(|(option, value)| (OptionId::from(*option), ValueId::from(*value)))
                .collect(),
            product_type: None,
        }
    }

    fn memory_restricts_gpu() -> ConfigurationRule {
        rule(
            "r-mem-gpu",
            "Memory bottleneck",
            50,
            conditions(&[("memory", "8GB")]),
            RuleAction::Restriction { restricted_options: vec![OptionId::from("gpu")] },
        )
    }

    #[test]
    fn restriction_prunes_selection_and_reports_diagnostic() {
        let engine = RuleEngine::with_rules(vec![memory_restricts_gpu()]);
        let selection = Selection::from_pairs([("memory", "8GB"), ("gpu", "RTX4080")]);

        let result = engine.evaluate(&selection, &workstation());

        assert_eq!(
            result.restrictions,
            vec!["Memory bottleneck: gpu is not available with current selection".to_owned()]
        );
        assert!(!result.validated_options.contains(&OptionId::from("gpu")));
        assert_eq!(result.validated_options.len(), 1);
        assert_eq!(selection.len(), 2, "caller selection is untouched");
    }

    #[test]
    fn dependency_and_auto_select_do_not_mutate_selection() {
        let engine = RuleEngine::with_rules(vec![
            rule(
                "r-dep",
                "High-end GPU",
                20,
                conditions(&[("gpu", "RTX4090")]),
                RuleAction::Dependency { required_option: OptionId::from("cooling") },
            ),
            rule(
                "r-auto",
                "Liquid cooling",
                10,
                conditions(&[("gpu", "RTX4090")]),
                RuleAction::AutoSelect {
                    option: OptionId::from("cooling"),
                    value: ValueId::from("liquid"),
                },
            ),
        ]);
        let selection = Selection::from_pairs([("memory", "32GB"), ("gpu", "RTX4090")]);

        let result = engine.evaluate(&selection, &workstation());

        assert_eq!(result.restrictions, vec!["High-end GPU: Please select cooling".to_owned()]);
        assert_eq!(
            result.auto_selections.get(&OptionId::from("cooling")),
            Some(&ValueId::from("liquid"))
        );
        assert_eq!(result.validated_options, selection);
    }

    #[test]
    fn conditions_fail_closed_when_referenced_option_is_missing() {
        let engine = RuleEngine::with_rules(vec![memory_restricts_gpu()]);
        let selection = Selection::from_pairs([("gpu", "RTX4080")]);

        let result = engine.evaluate(&selection, &workstation());

        assert!(result.restrictions.is_empty());
        assert_eq!(result.validated_options, selection);
    }

    #[test]
    fn product_type_condition_compares_category_name() {
        let mut laptop_only = rule(
            "r-price",
            "Laptop surcharge",
            0,
            RuleConditions { selected_options: BTreeMap::new(), product_type: Some("laptops".to_owned()) },
            RuleAction::Pricing { price_modifier: Decimal::new(40, 0) },
        );
        let engine = RuleEngine::with_rules(vec![laptop_only.clone()]);
        assert_eq!(engine.evaluate(&Selection::new(), &workstation()).price_adjustment, Decimal::ZERO);

        laptop_only.conditions.product_type = Some("workstations".to_owned());
        let engine = RuleEngine::with_rules(vec![laptop_only]);
        assert_eq!(
            engine.evaluate(&Selection::new(), &workstation()).price_adjustment,
            Decimal::new(40, 0)
        );
    }

    #[test]
    fn pricing_rules_accumulate_adjustments() {
        let engine = RuleEngine::with_rules(vec![
            rule("p-1", "Black finish", 5, conditions(&[("color", "black")]), RuleAction::Pricing {
                price_modifier: Decimal::new(25, 0),
            }),
            rule("p-2", "Loyalty", 1, RuleConditions::default(), RuleAction::Pricing {
                price_modifier: Decimal::new(-10, 0),
            }),
        ]);
        let result = engine.evaluate(&Selection::from_pairs([("color", "black")]), &workstation());
        assert_eq!(result.price_adjustment, Decimal::new(15, 0));
    }

    #[test]
    fn restriction_is_visible_to_lower_priority_rules_in_same_pass() {
        let engine = RuleEngine::with_rules(vec![
            memory_restricts_gpu(),
            rule(
                "r-gpu-auto",
                "GPU cooling",
                10,
                conditions(&[("gpu", "RTX4080")]),
                RuleAction::AutoSelect {
                    option: OptionId::from("cooling"),
                    value: ValueId::from("air-plus"),
                },
            ),
        ]);
        let result = engine.evaluate(
            &Selection::from_pairs([("memory", "8GB"), ("gpu", "RTX4080")]),
            &workstation(),
        );
        assert!(result.auto_selections.is_empty(), "gpu was removed before the auto rule ran");
    }

    #[test]
    fn single_pass_does_not_revisit_higher_priority_rules() {
        // Dependency on gpu (priority 90) runs before the restriction that removes gpu (10).
        let dependency = rule(
            "r-dep",
            "Creator bundle",
            90,
            conditions(&[("memory", "8GB")]),
            RuleAction::Dependency { required_option: OptionId::from("gpu") },
        );
        let restriction = rule(
            "r-res",
            "Memory bottleneck",
            10,
            conditions(&[("memory", "8GB")]),
            RuleAction::Restriction { restricted_options: vec![OptionId::from("gpu")] },
        );
        let selection = Selection::from_pairs([("memory", "8GB"), ("gpu", "RTX4080")]);

        let single = RuleEngine::with_rules(vec![dependency.clone(), restriction.clone()]);
        let result = single.evaluate(&selection, &workstation());
        assert_eq!(result.restrictions.len(), 1);

        let fixpoint = RuleEngine::with_rules(vec![dependency, restriction]).with_max_passes(4);
        let result = fixpoint.evaluate(&selection, &workstation());
        assert_eq!(
            result.restrictions,
            vec![
                "Memory bottleneck: gpu is not available with current selection".to_owned(),
                "Creator bundle: Please select gpu".to_owned(),
            ]
        );
    }

    #[test]
    fn ties_in_priority_are_broken_by_rule_id() {
        let engine = RuleEngine::with_rules(vec![
            rule("b", "Second", 5, RuleConditions::default(), RuleAction::Pricing {
                price_modifier: Decimal::ONE,
            }),
            rule("a", "First", 5, RuleConditions::default(), RuleAction::Pricing {
                price_modifier: Decimal::ONE,
            }),
            rule("c", "Top", 9, RuleConditions::default(), RuleAction::Pricing {
                price_modifier: Decimal::ONE,
            }),
        ]);
        let ids = engine.rules().iter().map(|rule| rule.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn inactive_rules_are_ignored() {
        let mut inactive = memory_restricts_gpu();
        inactive.active = false;
        let engine = RuleEngine::with_rules(vec![inactive]);
        assert!(engine.rules().is_empty());
    }

    #[test]
    fn available_values_exclude_values_that_trigger_restrictions() {
        let engine = RuleEngine::with_rules(vec![rule(
            "r-gpu-mem",
            "Memory bottleneck",
            50,
            conditions(&[("memory", "8GB")]),
            RuleAction::Restriction { restricted_options: vec![OptionId::from("gpu")] },
        )]);
        let product = workstation();
        let selection = Selection::from_pairs([("gpu", "RTX4080")]);
        let rules_before = engine.rules().to_vec();

        let memory = engine.available_values(&selection, &product, &OptionId::from("memory"));
        let again = engine.available_values(&selection, &product, &OptionId::from("memory"));

        assert_eq!(memory, vec![ValueId::from("16GB"), ValueId::from("32GB")]);
        assert_eq!(memory, again);
        assert_eq!(selection, Selection::from_pairs([("gpu", "RTX4080")]));
        assert_eq!(engine.rules(), rules_before.as_slice());
    }

    #[test]
    fn available_values_skip_unavailable_and_unknown_options() {
        let engine = RuleEngine::default();
        let product = workstation();

        let gpus = engine.available_values(&Selection::new(), &product, &OptionId::from("gpu"));
        assert!(!gpus.contains(&ValueId::from("RTX4090-ti")), "unavailable value is never offered");
        assert!(engine
            .available_values(&Selection::new(), &product, &OptionId::from("wheels"))
            .is_empty());

        let by_option = engine.available_values_by_option(&Selection::new(), &product);
        assert_eq!(by_option.len(), product.options.len());
    }

    #[test]
    fn availability_cache_reuses_results_per_selection() {
        let engine = RuleEngine::with_rules(vec![memory_restricts_gpu()]);
        let product = workstation();
        let cache = AvailabilityCache::default();
        let selection = Selection::from_pairs([("gpu", "RTX4080")]);

        let first = cache.available_values(&engine, &selection, &product, &OptionId::from("memory"));
        let second = cache.available_values(&engine, &selection, &product, &OptionId::from("memory"));
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        cache.available_values(&engine, &Selection::new(), &product, &OptionId::from("memory"));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn malformed_records_are_skipped_during_decode() {
        let records = vec![
            ConfigurationRuleRecord {
                id: RuleId("ok".to_owned()),
                product_id: ProductId::from("ws"),
                name: "Ok".to_owned(),
                rule_type: "restriction".to_owned(),
                conditions: json!({"selected_options": {"memory": "8GB"}}),
                actions: json!({"restricted_options": ["gpu"]}),
                priority: 1,
                active: true,
            },
            ConfigurationRuleRecord {
                id: RuleId("broken".to_owned()),
                product_id: ProductId::from("ws"),
                name: "Broken".to_owned(),
                rule_type: "quantum".to_owned(),
                conditions: json!({}),
                actions: json!({}),
                priority: 100,
                active: true,
            },
        ];

        let rules = decode_rules(records);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id.0, "ok");
    }

    #[test]
    fn misspelled_condition_keys_do_not_match_every_selection() {
        let records = vec![ConfigurationRuleRecord {
            id: RuleId("camel".to_owned()),
            product_id: ProductId::from("ws"),
            name: "Mem".to_owned(),
            rule_type: "restriction".to_owned(),
            conditions: json!({"selectedOptions": {"memory": "8GB"}}),
            actions: json!({"restricted_options": ["gpu"]}),
            priority: 1,
            active: true,
        }];

        let engine = RuleEngine::with_rules(decode_rules(records));
        assert!(engine.rules().is_empty());

        let selection = Selection::from_pairs([("memory", "32GB"), ("gpu", "RTX4080")]);
        let result = engine.evaluate(&selection, &workstation());
        assert!(result.restrictions.is_empty());
        assert_eq!(result.validated_options, selection);
    }

    #[test]
    fn overflowing_price_modifiers_are_skipped() {
        let engine = RuleEngine::with_rules(vec![
            rule("p-1", "Huge", 5, RuleConditions::default(), RuleAction::Pricing {
                price_modifier: Decimal::MAX,
            }),
            rule("p-2", "Huger", 4, RuleConditions::default(), RuleAction::Pricing {
                price_modifier: Decimal::MAX,
            }),
            rule("p-3", "Fee", 3, RuleConditions::default(), RuleAction::Pricing {
                price_modifier: Decimal::new(-1, 0),
            }),
        ]);

        let result = engine.evaluate(&Selection::new(), &workstation());
        assert_eq!(result.price_adjustment, Decimal::MAX - Decimal::ONE);
    }

    struct FailingRules;

    #[async_trait]
    impl RuleRepository for FailingRules {
        async fn active_rules(
            &self,
            _product_id: &ProductId,
        ) -> Result<Vec<ConfigurationRuleRecord>, RepositoryError> {
            Err(RepositoryError::Storage("connection reset".to_owned()))
        }
    }

    #[tokio::test]
    async fn failed_load_leaves_engine_usable_without_constraints() {
        let mut engine = RuleEngine::with_rules(vec![memory_restricts_gpu()]);
        let error = engine
            .load(&FailingRules, &ProductId::from("ws"))
            .await
            .expect_err("load should report the failure");

        assert!(error.to_string().contains("connection reset"));
        assert!(engine.rules().is_empty());
        let selection = Selection::from_pairs([("memory", "8GB"), ("gpu", "RTX4080")]);
        let result = engine.evaluate(&selection, &workstation());
        assert!(result.restrictions.is_empty());
        assert_eq!(result.validated_options, selection);
    }

    /// Random rule sets where restrictions only remove options that no other
    /// rule conditions on or refers to, so a pruned selection never
    /// re-triggers anything.
    #[test]
    fn re_evaluating_validated_options_is_idempotent_for_non_cascading_rules() {
        let product = workstation();
        let condition_options = ["memory", "color"];
        let restricted_options = ["storage", "warranty"];
        let referenced_options = ["gpu", "cooling"];
        let mut rng = StdRng::seed_from_u64(7);

        for round in 0..200 {
            let rules = (0..rng.gen_range(1..8))
                .map(|index| {
                    let option = condition_options[rng.gen_range(0..condition_options.len())];
                    let values = &product.option(&OptionId::from(option)).expect("option").values;
                    let value = values[rng.gen_range(0..values.len())].id.0.clone();
                    let restricted = restricted_options[rng.gen_range(0..restricted_options.len())];
                    let target = referenced_options[rng.gen_range(0..referenced_options.len())];
                    let action = match rng.gen_range(0..4) {
                        0 => RuleAction::Restriction {
                            restricted_options: vec![OptionId::from(restricted)],
                        },
                        1 => RuleAction::Dependency { required_option: OptionId::from(target) },
                        2 => RuleAction::AutoSelect {
                            option: OptionId::from(target),
                            value: ValueId::from("auto"),
                        },
                        _ => RuleAction::Pricing { price_modifier: Decimal::new(rng.gen_range(-50..50), 0) },
                    };
                    rule(
                        &format!("r-{round}-{index}"),
                        &format!("Rule {index}"),
                        rng.gen_range(0..5),
                        conditions(&[(option, value.as_str())]),
                        action,
                    )
                })
                .collect::<Vec<_>>();
            let engine = RuleEngine::with_rules(rules);

            let mut selection = Selection::new();
            for option in product.options.iter() {
                if rng.gen_bool(0.7) {
                    let value = &option.values[rng.gen_range(0..option.values.len())];
                    selection.insert(option.id.clone(), value.id.clone());
                }
            }

            let first = engine.evaluate(&selection, &product);
            let second = engine.evaluate(&first.validated_options, &product);

            assert_eq!(second.validated_options, first.validated_options, "round {round}");
            assert_eq!(second.auto_selections, first.auto_selections, "round {round}");
            assert_eq!(second.price_adjustment, first.price_adjustment, "round {round}");
            let removal_free = first
                .restrictions
                .iter()
                .filter(|message| !message.ends_with("is not available with current selection"))
                .cloned()
                .collect::<Vec<_>>();
            assert_eq!(second.restrictions, removal_free, "round {round}");
        }
    }
}

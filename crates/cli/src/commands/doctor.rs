use serde::Serialize;

use kitwright_core::config::AppConfig;
use kitwright_core::cpq::pricing::decode_pricing_rules;
use kitwright_core::cpq::rules::decode_rules;
use kitwright_core::repository::{CatalogRepository, InventoryChecker};
use kitwright_db::JsonCatalogStore;

use crate::commands::GlobalArgs;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const CATALOG_CHECKS: [&str; 3] = ["catalog_products", "rule_decoding", "inventory"];

pub fn run(args: &GlobalArgs, json_output: bool) -> String {
    let report = build_report(args);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(args: &GlobalArgs) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(args.load_options()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.extend(check_catalog(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in CATALOG_CHECKS {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_catalog(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail(
                CATALOG_CHECKS[0],
                format!("failed to initialize async runtime: {error}"),
            )];
            for name in CATALOG_CHECKS[1..].iter().copied() {
                checks.push(DoctorCheck::skipped(name, "the async runtime did not start"));
            }
            return checks;
        }
    };

    let store = JsonCatalogStore::open(config.catalog.data_dir.clone());
    runtime.block_on(async {
        let product_ids = match store.product_ids().await {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => {
                return vec![
                    DoctorCheck::fail(
                        "catalog_products",
                        format!(
                            "no products under `{}`; run `kitwright seed` to load the demo catalog",
                            store.root().display()
                        ),
                    ),
                    DoctorCheck::skipped("rule_decoding", "the catalog is empty"),
                    DoctorCheck::skipped("inventory", "the catalog is empty"),
                ];
            }
            Err(error) => {
                return vec![
                    DoctorCheck::fail("catalog_products", error.to_string()),
                    DoctorCheck::skipped("rule_decoding", "the catalog could not be listed"),
                    DoctorCheck::skipped("inventory", "the catalog could not be listed"),
                ];
            }
        };

        let mut problems = Vec::new();
        let mut value_ids = Vec::new();
        let mut rule_count = 0usize;
        for product_id in &product_ids {
            match store.product_with_options(product_id).await {
                Ok(Some(product)) => value_ids.extend(
                    product
                        .options
                        .iter()
                        .flat_map(|option| option.values.iter().map(|value| value.id.clone())),
                ),
                Ok(None) => problems.push(format!("{product_id}: product file vanished")),
                Err(error) => problems.push(format!("{product_id}: {error}")),
            }

            match store.all_rules(product_id).await {
                Ok(stored) => {
                    let total = stored.total();
                    let decoded = decode_rules(stored.records).len();
                    rule_count += decoded;
                    if decoded != total {
                        problems.push(format!("{product_id}: {} malformed rule(s)", total - decoded));
                    }
                }
                Err(error) => problems.push(format!("{product_id}: {error}")),
            }

            match store.all_pricing_rules(product_id).await {
                Ok(stored) => {
                    let total = stored.total();
                    let decoded = decode_pricing_rules(stored.records).len();
                    rule_count += decoded;
                    if decoded != total {
                        problems.push(format!(
                            "{product_id}: {} malformed pricing rule(s)",
                            total - decoded
                        ));
                    }
                }
                Err(error) => problems.push(format!("{product_id}: {error}")),
            }
        }

        let products =
            DoctorCheck::pass("catalog_products", format!("{} product(s) found", product_ids.len()));
        let rules = if problems.is_empty() {
            DoctorCheck::pass("rule_decoding", format!("{rule_count} rule(s) decoded"))
        } else {
            DoctorCheck::fail("rule_decoding", problems.join("; "))
        };
        let inventory = match store.check_availability(&value_ids).await {
            Ok(stock) => {
                let short = stock.values().filter(|available| !**available).count();
                DoctorCheck::pass(
                    "inventory",
                    format!("{} value(s) tracked, {short} out of stock", stock.len()),
                )
            }
            Err(error) => DoctorCheck::fail("inventory", error.to_string()),
        };

        vec![products, rules, inventory]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

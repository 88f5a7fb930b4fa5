use serde_json::json;

use crate::commands::{runtime, CommandResult, GlobalArgs};
use kitwright_db::{DemoDataset, JsonCatalogStore};

pub fn run(args: &GlobalArgs) -> CommandResult {
    let config = match args.load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let store = JsonCatalogStore::open(config.catalog.data_dir.clone());
    let result = runtime.block_on(async {
        let seeded = DemoDataset::standard()
            .write_to(&store)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoDataset::verify(&store)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        if !verification.all_present {
            let failed_checks = failed_checks(&verification.checks);
            return Err(("seed_verification", verification_message(&failed_checks), 6u8));
        }
        Ok(seeded)
    });

    match result {
        Ok(seeded) => {
            let message = format!(
                "demo catalog written to {}: {} products, {} rules, {} pricing rules, {} stock entries",
                store.root().display(),
                seeded.products,
                seeded.rules,
                seeded.pricing_rules,
                seeded.inventory_entries
            );
            let data = json!({
                "data_dir": store.root().display().to_string(),
                "products": seeded.products,
                "rules": seeded.rules,
                "pricing_rules": seeded.pricing_rules,
                "inventory_entries": seeded.inventory_entries,
            });
            CommandResult::success_with("seed", message, Some(data))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn failed_checks(checks: &[(String, bool)]) -> Vec<&str> {
    checks.iter().filter_map(|(check, passed)| (!passed).then_some(check.as_str())).collect()
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::json;

use crate::commands::{log_tracker, runtime, CommandResult, GlobalArgs, SelectionArgs};
use kitwright_core::{CheckoutVerifier, SessionSettings};
use kitwright_db::JsonCatalogStore;

/// Builds a submission from the selection and runs it through server-side
/// verification. Without `price` the session's displayed price is submitted.
pub fn run(args: &GlobalArgs, selection: &SelectionArgs, price: Option<&str>) -> CommandResult {
    let config = match args.load_config("checkout") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let submitted_price = match price.map(|raw| Decimal::from_str(raw.trim())).transpose() {
        Ok(price) => price,
        Err(error) => {
            return CommandResult::failure(
                "checkout",
                "invalid_input",
                format!("submitted price is not a decimal: {error}"),
                5,
            );
        }
    };
    let evaluated_at = match selection.evaluated_at() {
        Ok(evaluated_at) => evaluated_at,
        Err(message) => return CommandResult::failure("checkout", "invalid_input", message, 5),
    };
    let runtime = match runtime("checkout") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let store = JsonCatalogStore::open(config.catalog.data_dir.clone());
    let tracker = log_tracker(&config);
    let result = runtime.block_on(async {
        let session =
            selection.open_session("checkout", &store, &config, Some(tracker.clone())).await?;
        let mut submission = session.submission();
        if let Some(price) = submitted_price {
            submission.submitted_price = price;
        }

        let mut verifier = CheckoutVerifier::new(
            &store,
            &store,
            &store,
            &store,
            &store,
            SessionSettings::from_config(&config),
        );
        if let Some(evaluated_at) = evaluated_at {
            verifier = verifier.at(evaluated_at);
        }
        let configuration_id = verifier
            .verify_and_save(&submission)
            .await
            .map_err(|error| CommandResult::from_application_error("checkout", error))?;
        session.mark_saved(&configuration_id);
        Ok::<_, CommandResult>((configuration_id, submission))
    });
    if let Err(error) = tracker.stop() {
        tracing::warn!(event_name = "tracker.flush_failed", error = %error, "tracker flush failed");
    }

    match result {
        Ok((configuration_id, submission)) => CommandResult::success_with(
            "checkout",
            format!("configuration {configuration_id} verified at {}", submission.submitted_price),
            Some(json!({
                "configuration_id": configuration_id.0,
                "product_id": submission.product_id.0,
                "quantity": submission.quantity,
                "final_price": submission.submitted_price.round_dp(2).to_string(),
            })),
        ),
        Err(failure) => failure,
    }
}

use serde_json::json;

use crate::commands::{log_tracker, runtime, CommandResult, GlobalArgs, SelectionArgs};
use kitwright_db::JsonCatalogStore;

pub fn run(args: &GlobalArgs, selection: &SelectionArgs, accept_auto: bool) -> CommandResult {
    let config = match args.load_config("evaluate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("evaluate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let store = JsonCatalogStore::open(config.catalog.data_dir.clone());
    let tracker = log_tracker(&config);
    let result = runtime.block_on(async {
        let mut session =
            selection.open_session("evaluate", &store, &config, Some(tracker.clone())).await?;
        let accepted = if accept_auto { session.accept_auto_selections() } else { 0 };
        Ok::<_, CommandResult>((session.snapshot(), accepted))
    });
    if let Err(error) = tracker.stop() {
        tracing::warn!(event_name = "tracker.flush_failed", error = %error, "tracker flush failed");
    }

    match result {
        Ok((snapshot, accepted)) => {
            let status = if snapshot.restrictions.is_empty() { "valid" } else { "restricted" };
            let message = format!(
                "{} x{}: final price {} ({status}, {} restriction(s), {accepted} auto-selection(s) accepted)",
                snapshot.product_id,
                snapshot.quantity,
                snapshot.pricing.final_price,
                snapshot.restrictions.len(),
            );
            let data = serde_json::to_value(&snapshot)
                .unwrap_or_else(|error| json!({ "serialization_error": error.to_string() }));
            CommandResult::success_with("evaluate", message, Some(data))
        }
        Err(failure) => failure,
    }
}

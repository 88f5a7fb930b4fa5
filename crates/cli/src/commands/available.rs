use std::collections::BTreeMap;

use serde_json::json;

use crate::commands::{runtime, CommandResult, GlobalArgs, SelectionArgs};
use kitwright_db::JsonCatalogStore;

/// Lists, per option, the values still selectable given the current picks.
pub fn run(args: &GlobalArgs, selection: &SelectionArgs) -> CommandResult {
    let config = match args.load_config("available") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("available") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let store = JsonCatalogStore::open(config.catalog.data_dir.clone());
    let result = runtime.block_on(async {
        let session = selection.open_session("available", &store, &config, None).await?;
        let available = session
            .available_values()
            .into_iter()
            .map(|(option_id, values)| {
                (option_id.0, values.into_iter().map(|value_id| value_id.0).collect::<Vec<_>>())
            })
            .collect::<BTreeMap<_, _>>();
        Ok::<_, CommandResult>(available)
    });

    match result {
        Ok(available) => {
            let exhausted = available
                .iter()
                .filter(|(_, values)| values.is_empty())
                .map(|(option_id, _)| option_id.as_str())
                .collect::<Vec<_>>();
            let message = if exhausted.is_empty() {
                format!("{} options have selectable values", available.len())
            } else {
                format!("no selectable values left for: {}", exhausted.join(", "))
            };
            CommandResult::success_with("available", message, Some(json!(available)))
        }
        Err(failure) => failure,
    }
}

use std::env;
use std::fs;
use std::path::Path;

use kitwright_core::config::{resolve_config_path, AppConfig};
use toml::Value;

use crate::commands::GlobalArgs;

/// Effective configuration, one line per key, each attributed to the layer
/// that set it.
pub fn run(args: &GlobalArgs) -> String {
    let config = match AppConfig::load(args.load_options()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(args.config.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str], flag: Option<&str>| {
        field_source(key_path, env_keys, flag, config_file_doc.as_ref(), config_file_path.as_deref())
    };
    let data_dir_flag = args.data_dir.as_ref().map(|_| "--data-dir");

    let demand_seed = config
        .pricing
        .demand_seed
        .map(|seed| seed.to_string())
        .unwrap_or_else(|| "<unset>".to_string());

    let lines = vec![
        "effective config (source precedence: flag > env > file > default):".to_string(),
        render_line(
            "catalog.data_dir",
            &config.catalog.data_dir.display().to_string(),
            source("catalog.data_dir", &["KITWRIGHT_CATALOG_DATA_DIR"], data_dir_flag),
        ),
        render_line(
            "engine.max_passes",
            &config.engine.max_passes.to_string(),
            source("engine.max_passes", &["KITWRIGHT_ENGINE_MAX_PASSES"], None),
        ),
        render_line(
            "pricing.demand_model",
            &config.pricing.demand_model.to_string(),
            source("pricing.demand_model", &["KITWRIGHT_PRICING_DEMAND_MODEL"], None),
        ),
        render_line(
            "pricing.demand_seed",
            &demand_seed,
            source("pricing.demand_seed", &["KITWRIGHT_PRICING_DEMAND_SEED"], None),
        ),
        render_line(
            "pricing.business_hours_start",
            &config.pricing.business_hours_start.to_string(),
            source("pricing.business_hours_start", &["KITWRIGHT_PRICING_BUSINESS_HOURS_START"], None),
        ),
        render_line(
            "pricing.business_hours_end",
            &config.pricing.business_hours_end.to_string(),
            source("pricing.business_hours_end", &["KITWRIGHT_PRICING_BUSINESS_HOURS_END"], None),
        ),
        render_line(
            "tracker.flush_interval_secs",
            &config.tracker.flush_interval_secs.to_string(),
            source("tracker.flush_interval_secs", &["KITWRIGHT_TRACKER_FLUSH_INTERVAL_SECS"], None),
        ),
        render_line(
            "tracker.max_buffered_events",
            &config.tracker.max_buffered_events.to_string(),
            source("tracker.max_buffered_events", &["KITWRIGHT_TRACKER_MAX_BUFFERED_EVENTS"], None),
        ),
        render_line(
            "logging.level",
            &config.logging.level,
            source("logging.level", &["KITWRIGHT_LOGGING_LEVEL", "KITWRIGHT_LOG_LEVEL"], None),
        ),
        render_line(
            "logging.format",
            &format!("{:?}", config.logging.format).to_lowercase(),
            source("logging.format", &["KITWRIGHT_LOGGING_FORMAT", "KITWRIGHT_LOG_FORMAT"], None),
        ),
    ];

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    toml::from_str::<Value>(&raw).ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    flag: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(flag) = flag {
        return format!("flag ({flag})");
    }

    for env_key in env_keys {
        let set = env::var(env_key).map(|value| !value.trim().is_empty()).unwrap_or(false);
        if set {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

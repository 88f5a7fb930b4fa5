pub mod available;
pub mod checkout;
pub mod config;
pub mod doctor;
pub mod evaluate;
pub mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use kitwright_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use kitwright_core::errors::{ApplicationError, DomainError};
use kitwright_core::tracker::{SessionTracker, SystemClock, TrackerEvent, TrackerSettings, TrackerSink};
use kitwright_core::{ConfigurationSession, OptionId, ProductId, SessionSettings, ValueId};
use kitwright_db::JsonCatalogStore;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Maps an engine error onto an error class and exit code. Checkout
    /// rejections exit with 6, bad input with 5 and storage trouble with 4.
    pub fn from_application_error(command: &str, error: ApplicationError) -> Self {
        let (error_class, exit_code) = match &error {
            ApplicationError::Domain(DomainError::ProductNotFound(_)) => ("product_not_found", 5),
            ApplicationError::Domain(DomainError::ConfigurationInvalid { .. }) => {
                ("configuration_invalid", 6)
            }
            ApplicationError::Domain(DomainError::PriceMismatch { .. }) => ("price_mismatch", 6),
            ApplicationError::Domain(DomainError::InsufficientInventory { .. }) => {
                ("insufficient_inventory", 6)
            }
            ApplicationError::Domain(_) => ("invalid_input", 5),
            ApplicationError::Persistence(_) | ApplicationError::Integration(_) => ("storage", 4),
            ApplicationError::Configuration(_) => ("config_validation", 2),
        };
        let interface = error.into_interface(command);
        Self::failure(
            command,
            error_class,
            format!("{} ({interface})", interface.user_message()),
            exit_code,
        )
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Flags shared by every command for locating config and catalog data.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    #[arg(long, global = true, value_name = "PATH", help = "Read configuration from this TOML file")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "DIR", help = "Override catalog.data_dir")]
    pub data_dir: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides { data_dir: self.data_dir.clone(), ..ConfigOverrides::default() },
        }
    }

    pub fn load_config(&self, command: &str) -> Result<AppConfig, CommandResult> {
        AppConfig::load(self.load_options()).map_err(|error| {
            CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            )
        })
    }
}

/// A product plus the shopper's picks, as given on the command line.
#[derive(Debug, Clone, Args)]
pub struct SelectionArgs {
    #[arg(long, help = "Product id to configure")]
    pub product: String,
    #[arg(long = "select", value_name = "OPTION=VALUE", help = "Select a value, repeatable")]
    pub selections: Vec<String>,
    #[arg(long, default_value_t = 1)]
    pub quantity: u32,
    #[arg(long, help = "Customer segment for conditional pricing rules")]
    pub segment: Option<String>,
    #[arg(long, value_name = "RFC3339", help = "Evaluate at this timestamp instead of now")]
    pub at: Option<String>,
}

impl SelectionArgs {
    pub fn parsed_selections(&self) -> Result<Vec<(OptionId, ValueId)>, String> {
        self.selections.iter().map(|raw| parse_selection(raw)).collect()
    }

    pub fn evaluated_at(&self) -> Result<Option<DateTime<FixedOffset>>, String> {
        self.at
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|error| format!("`{raw}` is not an RFC 3339 timestamp: {error}"))
            })
            .transpose()
    }

    /// Opens a session over the store and replays the selections in order.
    pub async fn open_session(
        &self,
        command: &str,
        store: &JsonCatalogStore,
        config: &AppConfig,
        tracker: Option<Arc<SessionTracker>>,
    ) -> Result<ConfigurationSession, CommandResult> {
        let invalid = |message: String| CommandResult::failure(command, "invalid_input", message, 5);
        let picks = self.parsed_selections().map_err(invalid)?;
        let evaluated_at = self.evaluated_at().map_err(invalid)?;
        let rejected = |error: ApplicationError| CommandResult::from_application_error(command, error);

        let mut session = ConfigurationSession::start(
            store,
            store,
            store,
            &ProductId::from(self.product.as_str()),
            SessionSettings::from_config(config),
        )
        .await
        .map_err(rejected)?;
        if let Some(tracker) = tracker {
            session = session.with_tracker(tracker);
        }
        if let Some(evaluated_at) = evaluated_at {
            session = session.pinned_at(evaluated_at);
        }
        session.set_customer_segment(self.segment.clone());
        session.set_quantity(self.quantity).map_err(|error| rejected(error.into()))?;
        for (option_id, value_id) in picks {
            session.select(option_id, value_id).map_err(|error| rejected(error.into()))?;
        }
        Ok(session)
    }
}

pub fn parse_selection(raw: &str) -> Result<(OptionId, ValueId), String> {
    let Some((option, value)) = raw.split_once('=') else {
        return Err(format!("selection `{raw}` must look like OPTION=VALUE"));
    };
    let (option, value) = (option.trim(), value.trim());
    if option.is_empty() || value.is_empty() {
        return Err(format!("selection `{raw}` must look like OPTION=VALUE"));
    }
    Ok((OptionId::from(option), ValueId::from(value)))
}

pub(crate) fn runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Forwards tracked session events to the log.
#[derive(Debug, Default)]
pub struct LogTrackerSink;

impl TrackerSink for LogTrackerSink {
    fn deliver(&self, batch: &[TrackerEvent]) -> Result<(), kitwright_core::RepositoryError> {
        for event in batch {
            tracing::info!(
                event_name = "tracker.event",
                session_id = %event.session_id,
                kind = ?event.kind,
                metadata = ?event.metadata,
                "session event"
            );
        }
        Ok(())
    }
}

pub(crate) fn log_tracker(config: &AppConfig) -> Arc<SessionTracker> {
    let tracker = Arc::new(SessionTracker::new(
        Arc::new(SystemClock),
        Arc::new(LogTrackerSink),
        TrackerSettings::from_config(&config.tracker),
    ));
    tracker.start();
    tracker
}

#[cfg(test)]
mod tests {
    use kitwright_core::errors::{ApplicationError, DomainError};
    use rust_decimal::Decimal;
    use serde_json::Value;

    use super::{parse_selection, CommandResult};

    #[test]
    fn selection_pairs_parse_and_reject_garbage() {
        let (option, value) = parse_selection(" gpu = RTX4090 ").expect("valid pair");
        assert_eq!((option.as_str(), value.as_str()), ("gpu", "RTX4090"));

        assert!(parse_selection("gpu").is_err());
        assert!(parse_selection("=RTX4090").is_err());
        assert!(parse_selection("gpu=").is_err());
    }

    #[test]
    fn checkout_rejections_share_an_exit_code() {
        let result = CommandResult::from_application_error(
            "checkout",
            ApplicationError::from(DomainError::PriceMismatch {
                submitted: Decimal::new(100, 0),
                computed: Decimal::new(3150, 0),
            }),
        );
        assert_eq!(result.exit_code, 6);

        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "price_mismatch");
        assert!(payload.get("data").is_none());
    }
}

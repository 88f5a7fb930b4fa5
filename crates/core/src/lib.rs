pub mod checkout;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;
pub mod repository;
pub mod session;
pub mod tracker;

pub use checkout::CheckoutVerifier;
pub use cpq::pricing::{PriceContext, PricingEngine, PricingResult};
pub use cpq::rules::{AvailabilityCache, EvaluationResult, RuleEngine};
pub use cpq::{ConfiguratorEvaluation, ConfiguratorInput, ConfiguratorRuntime};
pub use domain::configuration::{ConfigurationId, ConfigurationSubmission, VerifiedConfiguration};
pub use domain::product::{ConfigOption, OptionId, OptionValue, Product, ProductId, ValueId};
pub use domain::selection::Selection;
pub use errors::{ApplicationError, DomainError, InterfaceError, RepositoryError};
pub use session::{ConfigurationSession, SessionSettings, SessionSnapshot};
pub use tracker::{SessionTracker, TrackerEvent, TrackerEventKind};

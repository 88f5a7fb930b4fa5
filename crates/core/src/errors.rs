use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("rule `{rule_id}` is malformed: {reason}")]
    MalformedRule { rule_id: String, reason: String },
    #[error("product `{0}` was not found")]
    ProductNotFound(String),
    #[error("option `{option_id}` does not exist on product `{product_id}`")]
    UnknownOption { product_id: String, option_id: String },
    #[error("value `{value_id}` does not belong to option `{option_id}`")]
    UnknownValue { option_id: String, value_id: String },
    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(u32),
    #[error("configuration is invalid: {}", restrictions.join("; "))]
    ConfigurationInvalid { restrictions: Vec<String> },
    #[error("submitted price {submitted} does not match computed price {computed}")]
    PriceMismatch { submitted: Decimal, computed: Decimal },
    #[error("insufficient inventory for {}", value_ids.join(", "))]
    InsufficientInventory { value_ids: Vec<String> },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to load configuration rules for product `{product_id}`: {source}")]
pub struct RuleLoadError {
    pub product_id: String,
    #[source]
    pub source: RepositoryError,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to load pricing rules for product `{product_id}`: {source}")]
pub struct PricingRuleLoadError {
    pub product_id: String,
    #[source]
    pub source: RepositoryError,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<RuleLoadError> for ApplicationError {
    fn from(value: RuleLoadError) -> Self {
        Self::Integration(value.to_string())
    }
}

impl From<PricingRuleLoadError> for ApplicationError {
    fn from(value: PricingRuleLoadError) -> Self {
        Self::Integration(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("rejected: {message}")]
    Rejected { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Rejected { .. } => {
                "The configuration could not be accepted. Review the selection and price."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Rejected { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Rejected { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(
                error @ (DomainError::ConfigurationInvalid { .. }
                | DomainError::PriceMismatch { .. }
                | DomainError::InsufficientInventory { .. }),
            ) => Self::Rejected { message: error.to_string(), correlation_id },
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

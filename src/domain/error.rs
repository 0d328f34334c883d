//! Application error types with proper error chaining.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("RPC call failed: {0}")]
    RpcError(String),
    #[error("Simulation failed: {0}")]
    SimulationFailed(String),
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Insufficient funds for transaction")]
    InsufficientFunds,
    #[error("Timeout waiting for confirmation: {0}")]
    Timeout(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<&str> for ConfigError {
    fn from(s: &str) -> Self {
        ConfigError::ParseError(s.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported network '{network}', supported networks: {}", .supported.join(", "))]
    UnsupportedNetwork {
        network: String,
        supported: Vec<String>,
    },
    #[error(
        "Unsupported currency '{currency}' on network '{network}', supported currencies: {}",
        .supported.join(", ")
    )]
    UnsupportedCurrency {
        network: String,
        currency: String,
        supported: Vec<String>,
    },
    #[error("Token address mismatch for {currency}: expected {expected}, got {actual}")]
    TokenAddressMismatch {
        currency: String,
        expected: String,
        actual: String,
    },
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Validation failed: {0}")]
    Multiple(String),
}

impl From<&str> for ValidationError {
    fn from(s: &str) -> Self {
        ValidationError::InvalidFormat(s.to_string())
    }
}

impl ValidationError {
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Rate limit exceeded")]
    RateLimited,
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(ValidationError::Multiple(err.to_string()))
    }
}

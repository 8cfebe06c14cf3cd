use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A structured error suitable for returning to a caller as JSON (CLI output, bridges).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub data: Value,
}

impl ErrorReport {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("wallet provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("wallet provider returned no accounts")]
    NoAccounts,

    #[error("registry write failed: {0}")]
    RegistryWriteFailed(String),

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("no authenticated session")]
    NotAuthenticated,
}

impl SessionError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::WalletNotFound(_) => "wallet_not_found",
            Self::UnsupportedNetwork(_) => "unsupported_network",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::NoAccounts => "no_accounts",
            Self::RegistryWriteFailed(_) => "registry_write_failed",
            Self::RegistryUnavailable(_) => "registry_unavailable",
            Self::NotAuthenticated => "not_authenticated",
        }
    }

    /// Validation failures are rejected before any state is touched.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress(_) | Self::WalletNotFound(_) | Self::UnsupportedNetwork(_)
        )
    }
}

impl From<SessionError> for ErrorReport {
    fn from(e: SessionError) -> Self {
        let code = e.code();
        match e {
            SessionError::InvalidAddress(addr) => Self::new(code, "address is not a valid wallet address")
                .with_data(serde_json::json!({ "address": addr })),
            SessionError::WalletNotFound(addr) => {
                Self::new(code, format!("wallet not found: {addr}"))
            }
            SessionError::UnsupportedNetwork(net) => {
                Self::new(code, format!("network is not supported: {net}"))
            }
            SessionError::ProviderUnavailable(why) => {
                Self::new(code, format!("no wallet provider available ({why})"))
            }
            SessionError::NoAccounts => {
                Self::new(code, "wallet provider did not authorize any account")
            }
            SessionError::RegistryWriteFailed(why) => {
                Self::new(code, format!("could not save wallet changes: {why}"))
            }
            SessionError::RegistryUnavailable(why) => {
                Self::new(code, format!("could not load wallets: {why}"))
            }
            SessionError::NotAuthenticated => Self::new(code, "sign in before connecting a wallet"),
        }
    }
}

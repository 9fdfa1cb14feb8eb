// feed-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {

    #[error("Storage error at '{locator}': {message}")]
    Storage {
        locator: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Catalog error: {message}")]
    Catalog {
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Caller contract violation: {message}")]
    Contract {
        message: String,
    },

    #[error("Internal consistency violation: {message}")]
    Consistency {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, FeedError>;

// Convenience constructors
impl FeedError {

    pub fn storage(locator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            locator: locator.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        locator: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            locator: locator.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract {
            message: message.into(),
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// True for errors worth retrying (transient storage failures).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

//! # Error Handling
//!
//! Error types for the configuration compiler, defined with `thiserror`.
//!
//! Every fatal condition surfaces as one of these variants and propagates
//! synchronously to the caller of [`crate::compile`]; there are no retries
//! inside the compiler. Degraded-feature conditions (a negative backend
//! deadline, a missing transcoding descriptor) are logged and defaulted
//! instead of raised.

/// Custom result type for compiler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the configuration compiler
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The API description is malformed or internally inconsistent
    #[error("invalid service description: {message}{}", selector_suffix(.selector))]
    Description { message: String, selector: Option<String> },

    /// A deployment option holds an unsupported value
    #[error("invalid option: {message}")]
    Options { message: String },

    /// Key-set discovery for an authentication provider failed
    #[error("key-set discovery failed for provider '{provider}': {message}")]
    Discovery { provider: String, message: String },
}

fn selector_suffix(selector: &Option<String>) -> String {
    match selector {
        Some(selector) => format!(" (selector '{}')", selector),
        None => String::new(),
    }
}

impl Error {
    /// Create a description error without an offending selector
    pub fn description<S: Into<String>>(message: S) -> Self {
        Self::Description { message: message.into(), selector: None }
    }

    /// Create a description error naming the offending selector
    pub fn description_for<S: Into<String>, M: Into<String>>(selector: S, message: M) -> Self {
        Self::Description { message: message.into(), selector: Some(selector.into()) }
    }

    /// Create an options error
    pub fn options<S: Into<String>>(message: S) -> Self {
        Self::Options { message: message.into() }
    }

    /// Create a discovery error
    pub fn discovery<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Discovery { provider: provider.into(), message: message.into() }
    }
}

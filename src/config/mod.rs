//! Deployment configuration for the compiler.

mod options;

pub use options::{
    CorsPreset, DependencyErrorBehavior, DnsLookupFamily, Options, TokenSource,
    DEFAULT_BACKEND_DEADLINE_SECS,
};

//! Enhanced HTTP client composing the resilience components.
//!
//! The public surface is small: build an [`EnhancedClient`] around a
//! [`Transport`](crate::transport::Transport) and call `send`. Implementation
//! details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
pub mod signals;
pub mod stats;

pub use builder::EnhancedClientBuilder;
pub use self::core::{EnhancedClient, DEFAULT_IDENTITY};
pub use signals::SignalsSnapshot;
pub use stats::{EndpointStats, PerformanceTracker};

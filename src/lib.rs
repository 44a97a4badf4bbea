//! # Bulker Dispatch
//!
//! Shapes analytics events into warehouse rows and delivers them to a bulker
//! ingestion gateway.
//!
//! ## Architecture
//!
//! ```text
//! AnalyticsEvent -> DataLayout -> [MappedEvent] -> Dispatcher -> Transport -> bulker
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Inbound event envelope
//! - [`layouts`]: The four data layouts and the shared merge helpers
//! - [`normalize`]: Key snake-casing and absent-value stripping
//! - [`tables`]: Table naming rules
//! - [`anonymize`]: IPv4 anonymization
//! - [`dispatch`]: Per-event delivery with retryable failures
//! - [`transport`]: Outbound HTTP capability
//! - [`config`]: TOML configuration
//! - [`shutdown`]: Graceful shutdown signal for the server

pub mod anonymize;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod layouts;
pub mod normalize;
pub mod shutdown;
pub mod tables;
pub mod transport;

// Re-export commonly used types at crate root
pub use dispatch::{DestinationConfig, DispatchError, Dispatcher, InvocationContext};
pub use event::AnalyticsEvent;
pub use layouts::{DataLayout, Layout, MappedEvent};
pub use transport::{DeliveryError, HttpTransport, Transport};

//! Outbound webhook subsystem.
//!
//! # Responsibilities
//! - Hold subscriptions and their delivery health (registry.rs)
//! - Sign payloads so receivers can authenticate them (signing.rs)
//! - POST one signed payload with a deadline (delivery.rs)
//! - Fan an event out to every matching subscriber (dispatcher.rs)
//!
//! # Data Flow
//! ```text
//! feature code → dispatcher.dispatch(event, payload)
//!     → registry.find_active_for(event)
//!     → per subscriber: signing.sign → delivery.send → registry.record_*
//! ```
//!
//! # Design Decisions
//! - Best-effort: no retries, no queue; a failed delivery only moves the
//!   subscription's failure count
//! - A subscription is deactivated once its consecutive failures exceed
//!   the configured maximum

pub mod delivery;
pub mod dispatcher;
pub mod registry;
pub mod signing;
pub mod types;

pub use delivery::{DeliveryAttempt, DeliveryOutcome, WebhookSender};
pub use dispatcher::{DispatchHandle, DispatchSummary, WebhookDispatcher};
pub use registry::{RegistryError, RegistrySummary, SubscriptionRegistry};
pub use types::{CreatedSubscription, EventType, SubscriptionId, SubscriptionView};

//! Business logic services

pub mod data_provider;
pub mod resolution;
pub mod router;
pub mod scheduler;
pub mod webhook;

pub use data_provider::{DataProvider, InMemoryDataProvider};
pub use resolution::{ResolutionEngine, ScheduleOutcome};
pub use router::{OracleRouter, RouterSettings, Subscription, SubscriptionCallback};
pub use scheduler::Scheduler;
pub use webhook::WebhookHandler;

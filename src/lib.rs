pub mod abi;
pub mod config;
pub mod error;
pub mod event_decoder;
pub mod notifier;
pub mod server;
pub mod subscriptions;
pub mod types;

//! # Token Hub Library
//!
//! Keeps one access token per registered application in a shared store and
//! makes sure that, across every running instance, only one caller fetches
//! a new token from the remote authority at a time. Everyone else waits
//! for that fetch and receives the same outcome.
//!
//! Modules:
//! - `config`: service configuration and the app registry
//! - `store`: shared key-value / pub-sub store (Redis or in-process)
//! - `cache`: token records kept in the shared store
//! - `sources`: remote authority fetcher
//! - `coordination`: lock, dispatcher, notifier, timers and the coordinator
//! - `resilience`: bounded retry
//! - `server`: HTTP surface

pub mod cache;
pub mod config;
pub mod coordination;
pub mod error;
pub mod helpers;
pub mod observability;
pub mod resilience;
pub mod server;
pub mod sources;
pub mod store;
pub mod utils;

#[cfg(test)]
pub mod tests;

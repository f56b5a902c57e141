pub mod coordinator;
pub mod dispatcher;
pub mod lock;
pub mod notifier;
pub mod timers;

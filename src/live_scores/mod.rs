//! Match state, change detection, event fan-out and the polling loop.

pub mod detector;
pub mod dispatcher;
pub mod export;
pub mod scheduler;
pub mod store;

pub use dispatcher::{ChannelSubscriber, LogSubscriber};
pub use scheduler::{PollCadence, PollingScheduler};

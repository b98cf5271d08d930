pub mod adapter;
pub mod builder;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod transport;

pub use adapter::{BotAdapter, MessageCallback};
pub use config::Config;
pub use error::{Error, Result};
pub use gateway::dispatcher::{event_handler, EventHandler};
pub use gateway::events::InboundEvent;
pub use models::message::{MediaSource, Mention, MessageChain, Segment};

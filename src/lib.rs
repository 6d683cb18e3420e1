pub mod cli;
pub mod config;
pub mod control;
pub mod domain;
pub mod engine;
pub mod lnd;
pub mod observability;
pub mod policy;
pub mod store;
pub mod supervisor;

pub use config::{Cli, Command, Config, Network};
pub use control::ControlApi;
pub use domain::{Attempt, ChannelId, Decision, DecisionReason, Exception, Session};
pub use policy::{Classification, PolicyIndex};
pub use store::SqliteStore;

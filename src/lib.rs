pub mod command;
pub mod config;
pub mod link;
pub mod messages;
pub mod protocol;
pub mod recorder;
pub mod runtime;
pub mod telemetry;
pub mod transport;
pub mod tuning;

//! vstream application: CLI, logging, WebSocket transport and component
//! wiring around the recognition core.

pub mod app;
pub mod cli;
pub mod logging;
pub mod server;

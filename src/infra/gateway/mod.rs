//! Processor gateway backends.

pub mod command;
pub mod simulated;
pub mod worker;

pub use command::{clean_output, CommandExecutor};
pub use simulated::SimulatedGateway;
pub use worker::WorkerGateway;

/// Shared helpers for commands, polling, probes and prompts
pub mod command;
pub mod fs;
pub mod polling;
pub mod probe;
pub mod prompt;

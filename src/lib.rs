pub mod commands;
pub mod config_paths;
pub mod context;
pub mod docker;
pub mod git;
pub mod orchestrator;
pub mod repository;
pub mod session;
pub mod ssh;
pub mod target;
pub mod transport;

#[cfg(test)]
pub mod test_utils;

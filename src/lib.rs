pub mod config;
pub mod coordinator;
pub mod crash;
pub mod ipc;
pub mod parser;
pub mod scheduler;
pub mod supervisor;
pub mod utils;

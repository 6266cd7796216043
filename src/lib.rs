pub mod api;
pub mod cli;
pub mod engine;
pub mod nodes;
pub mod storage;
pub mod workers;

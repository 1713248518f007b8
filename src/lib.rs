pub mod artifact;
pub mod cli;
pub mod collector;
pub mod config;
pub mod context;
pub mod logging;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod timestamp;
pub mod window;

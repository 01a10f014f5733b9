pub mod batch;
pub mod cli;
pub mod config;
pub mod encode;
pub mod pipeline;
pub mod router;
pub mod sink;
pub mod source;

pub mod classifier;
pub mod domain;
pub mod interpreter;
pub mod limiter;
pub mod service;
pub mod traits;

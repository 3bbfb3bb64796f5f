pub mod cache;
pub mod config;
pub mod engine;
pub mod journal;
pub mod lifecycle;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod slots;
pub mod store;

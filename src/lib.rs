pub mod channel;
pub mod collab;
pub mod config;
pub mod limits;
pub mod local;
pub mod manager;
pub mod model;
pub mod notify;
pub mod observability;
pub mod scheduler;

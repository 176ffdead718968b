pub mod access;
pub mod api;
pub mod config;
pub mod containers;
pub mod error;
pub mod gears;
pub mod identifiers;
pub mod node;
pub mod scheduler;
pub mod seed;
pub mod shutdown;
pub mod store;

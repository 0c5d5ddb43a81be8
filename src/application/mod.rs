pub mod bootstrap;
pub mod commands;
pub mod identity;
pub mod projections;
pub mod session;
pub mod store;

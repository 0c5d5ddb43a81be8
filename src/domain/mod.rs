pub mod models;
pub mod themes;

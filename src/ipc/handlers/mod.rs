pub mod auth;
pub mod backup;
pub mod catalog;
pub mod core;
pub mod dashboard;
pub mod results;

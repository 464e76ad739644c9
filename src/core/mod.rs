//! Entity model, business rules and the ambient application plumbing.

pub mod config;
pub mod error;
pub mod log;
pub mod model;
pub mod rules;

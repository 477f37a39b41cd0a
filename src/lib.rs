pub mod data;
pub mod engine;
pub mod error;
pub mod models;
pub mod safety;
pub(crate) mod scope_path;
pub mod services;

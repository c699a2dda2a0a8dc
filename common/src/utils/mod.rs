pub mod config;
pub mod context_assembly;

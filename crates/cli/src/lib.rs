//! Public library modules for the CLI crate
pub mod context;
pub mod output;

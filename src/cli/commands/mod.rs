//! CLI command implementations

pub mod build;
pub mod cache;
pub mod validate;

pub use build::execute as build;
pub use cache::execute as cache;
pub use validate::execute as validate;

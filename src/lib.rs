pub mod catalog;
pub mod category_resolver;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod import;
pub mod mapping;
pub mod parser;

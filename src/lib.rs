pub mod commitment;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod restore;
pub mod sharing;
pub mod vault;

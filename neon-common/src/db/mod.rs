//! History database bootstrap
//!
//! Opens the single-file SQLite store in write-ahead-log mode and brings its
//! schema up to date. Queries live with the code that owns them.

pub mod init;
pub mod migrations;

pub use init::{connect_options, init_database, init_memory_database};

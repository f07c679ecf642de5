//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Row-level functions for desks, lots, matches, transactions, balances and undo entries

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{Repository, WriteTx};

//! sqlprompt: an interactive SQL shell. Lines are classified as colon
//! meta-commands, SQL fragments or batch terminators; meta-commands expand
//! registered query templates and run at once, SQL accumulates until `GO`.

pub mod batch;
pub mod cli;
pub mod cli_core;
pub mod commands;
pub mod config;
pub mod database;
pub mod database_mysql;
pub mod database_postgresql;
pub mod database_sqlite;
pub mod format;
pub mod input;
pub mod logging;
pub mod password_sanitizer;
pub mod prompt;
pub mod script;
pub mod session;
pub mod sql_text;
pub mod templates;

#[cfg(test)]
pub(crate) mod test_support;

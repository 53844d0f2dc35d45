//! Command implementations for the cardmap CLI.

pub mod approve;
pub mod config;
pub mod run;

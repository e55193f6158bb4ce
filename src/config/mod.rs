//! Opcmon configuration module
//! Handles loading and saving the group definition file

pub mod config;

pub use config::Config;

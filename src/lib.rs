//! Opcmon - Client-side coordinator for groups of OPC UA monitored items

pub mod cli;
pub mod config;
pub mod monitor;
pub mod session;

//! Command line interface

pub mod commands;

pub fn run() -> anyhow::Result<()> {
    commands::run()
}

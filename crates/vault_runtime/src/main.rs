//! Vault Runtime
//!
//! Minimal host binary: binds the native types, compiles a Lua script once
//! and runs it.

mod driver;
mod settings;
mod types;

use anyhow::Result;
use clap::Parser;
use settings::RuntimeSettings;
use std::path::PathBuf;
use vault_script::TypeRegistry;

#[derive(Parser)]
#[command(name = "vault")]
#[command(about = "Run a Lua script against the bound native types", long_about = None)]
struct Args {
    /// Lua script to compile and run
    script: PathBuf,
    /// JSON settings file (defaults apply when omitted)
    settings: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let settings = match &args.settings {
        Some(path) => RuntimeSettings::load(path)?,
        None => RuntimeSettings::default(),
    };

    tracing::info!("Vault v{}", vault_core::VERSION);
    let registry = TypeRegistry::shared();
    types::register_all(&registry)?;
    tracing::info!(types = ?registry.identities(), "native types registered");

    let report = driver::run(&settings, &args.script, &registry)?;
    for line in &report.last_result {
        println!("{line}");
    }
    Ok(())
}

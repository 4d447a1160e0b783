// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! modgate - load modules through an access and transform policy
//!
//! Builds a policy from a policy file and command-line flags, installs it on
//! the process-wide module system and loads the requested modules, printing
//! their exports as JSON. `-i` opens an interactive session.

mod repl;

use anyhow::Context;
use clap::Parser;
use modgate_core::{
    upgrade_global, ModgateError, ModuleSystem, Policy, PolicyConfig, SharedPolicy, VERSION,
};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "modgate",
    about = "Load modules through an access and transform policy",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Modules to load, relative to the current directory
    modules: Vec<String>,

    /// Deny these identifiers
    #[arg(long, value_name = "ID", value_delimiter = ',')]
    blacklist: Vec<String>,

    /// Only allow these identifiers
    #[arg(long, value_name = "ID", value_delimiter = ',')]
    whitelist: Vec<String>,

    /// Only allow native modules
    #[arg(long)]
    no_external: bool,

    /// Re-execute modules on every request
    #[arg(long)]
    reload: bool,

    /// Return independent copies of module exports
    #[arg(long)]
    copy: bool,

    /// Extra search folder for bare specifiers
    #[arg(long = "path", value_name = "DIR")]
    paths: Vec<PathBuf>,

    /// Policy file (defaults to the user policy file when it exists)
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Start an interactive session after loading
    #[arg(short = 'i', long = "interactive", alias = "repl")]
    interactive: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "modgate=debug,modgate_core=debug"
    } else {
        "modgate=warn,modgate_core=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let policy = SharedPolicy::new(build_policy(&cli)?);
    upgrade_global(&policy)?;
    let system = ModuleSystem::global();

    let mut failed = false;
    for identifier in &cli.modules {
        match system.require(identifier) {
            Ok(exports) => println!("{}", serde_json::to_string_pretty(&exports.to_json())?),
            Err(e) => {
                print_error(identifier, &e);
                failed = true;
            }
        }
    }

    if cli.interactive || cli.modules.is_empty() {
        let mut repl = repl::Repl::new(system.clone(), policy)?;
        repl.run()?;
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Policy file first, then command-line flags on top
fn build_policy(cli: &Cli) -> anyhow::Result<Policy> {
    let config_path = cli.policy.clone().or_else(|| {
        dirs::config_dir()
            .map(|dir| PolicyConfig::user_config_path(&dir))
            .filter(|path| path.exists())
    });

    let mut policy = match config_path {
        Some(path) => {
            let config = PolicyConfig::load(&path)
                .with_context(|| format!("failed to load policy file {}", path.display()))?;
            tracing::debug!("Loaded policy from {}", path.display());
            Policy::from_config(&config)?
        }
        None => Policy::new(),
    };

    for id in &cli.blacklist {
        policy.add_blacklist(id.as_str())?;
    }
    for id in &cli.whitelist {
        policy.add_whitelist(id.as_str())?;
    }
    policy.add_paths(&cli.paths)?;
    if cli.no_external {
        policy.set_allow_external_modules(false);
    }
    if cli.reload {
        policy.set_reload(true);
    }
    if cli.copy {
        policy.set_use_copy(true);
    }

    Ok(policy)
}

fn print_error(identifier: &str, error: &ModgateError) {
    eprintln!(
        "{} {}: {}",
        "Error".red().bold(),
        identifier.cyan(),
        error
    );
}

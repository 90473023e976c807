use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use relayd_core::config::{Config, WarnLevel};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a default relayd.yaml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective config
    Show,

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init { force } => init(path, force, json),
        ConfigSubcommand::Show => show(path, json),
        ConfigSubcommand::Validate => validate(path, json),
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(path: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    Config::init(path, force)?;
    if json {
        print_json(&serde_json::json!({ "path": path }))?;
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(path).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(path).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        let rows = warnings
            .iter()
            .map(|w| {
                let level = match w.level {
                    WarnLevel::Warning => "warning",
                    WarnLevel::Error => "error",
                };
                vec![level.to_string(), w.message.clone()]
            })
            .collect();
        print_table(&["LEVEL", "MESSAGE"], rows);
    }

    if Config::has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

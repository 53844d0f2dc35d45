//! The `cardmap config` command: inspect and scaffold the TOML config.

use std::path::PathBuf;

use cardmap_core::Config;
use clap::{Args, Subcommand};

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML, with its fingerprint
    Show {
        /// Read this file instead of the default location
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print where the config file is looked up
    Path,

    /// Write a default config file to the standard location
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Execute the config command.
pub async fn execute(args: ConfigArgs) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show { file } => show(file),
        ConfigCommand::Path => {
            println!("{}", Config::default_path().display());
            Ok(())
        }
        ConfigCommand::Init { force } => init(force),
    }
}

fn show(file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match file {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    print!("{}", config.to_toml()?);
    println!();
    println!("# fingerprint: {}", config.fingerprint());
    println!("# artifacts:   {}", config.artifact_dir().display());
    Ok(())
}

fn init(force: bool) -> anyhow::Result<()> {
    let path = Config::default_path();
    if path.exists() && !force {
        anyhow::bail!(
            "config already exists at {} (pass --force to replace it)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, Config::default().to_toml()?)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[clustering]\ntarget_leaf_count = 7\n").unwrap();

        assert!(show(Some(path)).is_ok());
    }

    #[test]
    fn test_show_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[embedding]\nimage_weight = 3.0\n").unwrap();

        assert!(show(Some(path)).is_err());
    }
}

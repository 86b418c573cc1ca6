use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use vaultsync::{AlwaysConfirm, DeletePrompt, FsVault, Settings, SyncEngine, logging};

#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(about = "Mirror a document vault into a plain external folder")]
#[command(version)]
struct Cli {
    /// Path to the vault root
    #[arg(long, default_value = ".", global = true)]
    vault: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Run a one-shot full synchronization
    Sync,

    /// Watch and synchronize continuously
    Run {
        /// Delete external counterparts without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

/// Asks on the terminal before an external deletion.
struct ConsolePrompt;

#[async_trait]
impl DeletePrompt for ConsolePrompt {
    async fn confirm_delete(&self, path: &Path) -> bool {
        let prompt = format!("Delete external file {}? [y/N] ", path.display());
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            print!("{prompt}");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return false;
            }
            matches!(line.trim(), "y" | "Y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let vault_root = cli
        .vault
        .canonicalize()
        .with_context(|| format!("vault root {} not found", cli.vault.display()))?;

    let settings = Settings::load(&vault_root)
        .with_context(|| format!("failed to load configuration for {}", vault_root.display()))?;
    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            let config_path = Settings::config_path(&vault_root);
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            Settings::default().save(&vault_root)?;
            println!("Wrote {}", config_path.display());
        }

        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Sync => {
            require_external_root(&settings)?;
            let vault = Arc::new(FsVault::open(&vault_root)?);
            let engine = SyncEngine::new(vault, settings.sync.clone(), Arc::new(AlwaysConfirm));
            engine.full_sync().await?;
        }

        Commands::Run { yes } => {
            require_external_root(&settings)?;
            let vault = Arc::new(FsVault::open(&vault_root)?);
            let prompt: Arc<dyn DeletePrompt> = if yes {
                Arc::new(AlwaysConfirm)
            } else {
                Arc::new(ConsolePrompt)
            };
            let mut engine = SyncEngine::new(vault, settings.sync.clone(), prompt);

            engine.full_sync().await?;
            engine.start().await?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            engine.shutdown().await;
        }
    }

    Ok(())
}

fn require_external_root(settings: &Settings) -> anyhow::Result<()> {
    if settings.sync.external_root.is_none() {
        anyhow::bail!(
            "no external root configured; set sync.external_root in {} first",
            vaultsync::config::CONFIG_FILE
        );
    }
    Ok(())
}

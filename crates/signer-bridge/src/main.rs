//! signer-bridge - administer a signing bridge's permissions, audit trail and
//! configuration

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use signer_bridge::audit::read_tail;
use signer_bridge::permissions::SqliteRuleBackend;
use signer_bridge::{Action, BridgeConfig, PermissionStore, telemetry};

#[derive(Parser)]
#[command(name = "signer-bridge", version, about = "NIP-55 signing bridge administration")]
struct Cli {
    /// Config file (defaults to <config dir>/signer-bridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or revoke remembered permissions
    #[command(subcommand)]
    Permissions(PermissionsCommand),
    /// Read the audit trail
    #[command(subcommand)]
    Audit(AuditCommand),
    /// Show or create the config file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum PermissionsCommand {
    /// List remembered rules
    List {
        /// Only rules for this calling app
        #[arg(long)]
        app: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Revoke rules
    Revoke(RevokeArgs),
}

#[derive(Args)]
struct RevokeArgs {
    /// Calling app package identifier
    app: String,
    /// Action identifier (e.g. sign_event); omit with --all
    action: Option<String>,
    /// Exact event kind (sign_event only); omit for the any-target rule
    #[arg(long)]
    target: Option<String>,
    /// Revoke every rule of the app
    #[arg(long, conflicts_with_all = ["action", "target"])]
    all: bool,
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Print the most recent entries
    Tail {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => BridgeConfig::config_path()?,
    };
    let config = BridgeConfig::load_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let _ = telemetry::init(&config.log_filter, config.log_format);

    match cli.command {
        Command::Permissions(command) => permissions(&config, command).await,
        Command::Audit(AuditCommand::Tail { limit, json }) => audit_tail(&config, limit, json),
        Command::Config(ConfigCommand::Show) => {
            println!("# {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Config(ConfigCommand::Init { force }) => {
            if config_path.exists() && !force {
                bail!("{} already exists (use --force)", config_path.display());
            }
            BridgeConfig::default().save_to(&config_path)?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
    }
}

async fn permissions(config: &BridgeConfig, command: PermissionsCommand) -> anyhow::Result<()> {
    let db_path = config.permissions_db_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let backend = SqliteRuleBackend::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let store = PermissionStore::open(Arc::new(backend))?;

    match command {
        PermissionsCommand::List { app, json } => {
            let rules = store.list(app.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else if rules.is_empty() {
                println!("No remembered permissions");
            } else {
                for rule in rules {
                    let created = chrono::DateTime::from_timestamp_millis(rule.created_at)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default();
                    println!(
                        "{:<32} {:<15} {:<20} {:<5} {}",
                        rule.calling_app,
                        rule.action.as_str(),
                        rule.scope.to_string(),
                        rule.decision.as_str(),
                        created
                    );
                }
            }
        }
        PermissionsCommand::Revoke(args) => {
            if args.all {
                let removed = store.revoke_app(&args.app).await?;
                println!("Revoked {removed} rule(s) for {}", args.app);
                return Ok(());
            }
            let Some(action) = args.action else {
                bail!("an action is required unless --all is given");
            };
            let action = Action::parse(&action)
                .with_context(|| format!("unknown action {action}"))?;
            if store.revoke(&args.app, action, args.target.as_deref()).await? {
                println!("Revoked");
            } else {
                println!("No matching rule");
            }
        }
    }
    Ok(())
}

fn audit_tail(config: &BridgeConfig, limit: usize, json: bool) -> anyhow::Result<()> {
    let path = config.audit_log_path()?;
    if !path.exists() {
        println!("No audit entries ({} does not exist)", path.display());
        return Ok(());
    }
    for entry in read_tail(&path, limit)? {
        if json {
            println!("{}", serde_json::to_string(&entry)?);
            continue;
        }
        let time = chrono::DateTime::from_timestamp_millis(entry.timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let request = entry
            .request_key
            .as_ref()
            .map(|key| key.id.as_str())
            .unwrap_or("-");
        let action = entry.action.map(|a| a.as_str()).unwrap_or("-");
        println!(
            "{time} {:<12} {:<32} {:<15} {request} {}",
            entry.decision.as_str(),
            entry.calling_app,
            action,
            entry.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

//! `AquaSense` CLI
//!
//! User, admin and super-admin dashboards over the pond document store.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use aquasense_core::RuleEngine;
use aquasense_core::config::{self, Config};
use aquasense_core::db::unix_timestamp;
use aquasense_core::tracing_init::{LogTarget, crate_filter, init_tracing};
use aquasense_store::Database;

use aquasense_cli::admin_cmd::{self, AdminAction};
use aquasense_cli::dashboard::bootstrap_superadmin;
use aquasense_cli::super_cmd::{self, SuperAction};
use aquasense_cli::user_cmd::{self, Context, UserAction};
use aquasense_cli::{DashboardSettings, Session, fmt};

#[derive(Parser, Debug)]
#[command(name = "aquasense")]
#[command(version, about = "AquaSense pond dashboards", long_about = None)]
struct Cli {
    /// Signed-in user id
    #[arg(long, env = "AQUASENSE_UID", global = true)]
    uid: Option<String>,

    /// Database file path
    #[arg(long, env = "AQUASENSE_DB_PATH", global = true)]
    db_path: Option<PathBuf>,

    /// Access rule file (TOML); built-in rules when omitted
    #[arg(long, env = "AQUASENSE_RULES_PATH", global = true)]
    rules: Option<PathBuf>,

    /// Output logs as JSON
    #[arg(long, env = "AQUASENSE_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create your own account (role: user)
    Register {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Create the first super-admin (only while none exists)
    InitSuperadmin {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Show the signed-in profile
    Whoami,
    /// Your pond
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Admin dashboard
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// Super-admin dashboard
    Super {
        #[command(subcommand)]
        action: SuperAction,
    },
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let cwd = std::env::current_dir()?;
    let mut config = config::load_config(Some(cwd.as_path()))?;
    if let Some(path) = &cli.db_path {
        config.store.database_path = Some(path.clone());
    }
    if let Some(path) = &cli.rules {
        config.access.rules_path = Some(path.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let log_filter = crate_filter(&["aquasense_cli", "aquasense_store"], &config.store.log_level);
    init_tracing(&log_filter, cli.log_json, LogTarget::Stderr);

    let db_path = match &config.store.database_path {
        Some(path) => path.clone(),
        None => config::database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let rules = Arc::new(match &config.access.rules_path {
        Some(path) => RuleEngine::load(path)?,
        None => RuleEngine::new(),
    });
    let settings = DashboardSettings {
        utc_offset_secs: config.runtime.utc_offset_secs(),
        default_limit: config.dashboard.default_limit,
    };
    let ctx = Context {
        now: unix_timestamp(),
        offset_secs: settings.utc_offset_secs,
        refresh: Duration::from_secs(config.dashboard.refresh_interval_secs.max(1)),
    };

    let result = dispatch(cli, db.clone(), rules, settings, &ctx).await;
    db.close().await;
    result
}

async fn dispatch(
    cli: Cli,
    db: Database,
    rules: Arc<RuleEngine>,
    settings: DashboardSettings,
    ctx: &Context,
) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let uid = cli
        .uid
        .ok_or_else(|| anyhow::anyhow!("no user: pass --uid or set AQUASENSE_UID"))?;

    match cli.command {
        Command::Register { name, email } => {
            let session = Session::register(db, rules, &uid, &name, &email, ctx.now, settings).await?;
            fmt::write_profile(&mut out, session.profile(), ctx.offset_secs)?;
        }
        Command::InitSuperadmin { name, email } => {
            let profile = bootstrap_superadmin(&db, &uid, &name, &email, ctx.now).await?;
            fmt::write_profile(&mut out, &profile, ctx.offset_secs)?;
        }
        Command::Whoami => {
            let session = Session::resolve(db, rules, &uid, settings).await?;
            fmt::write_profile(&mut out, session.profile(), ctx.offset_secs)?;
        }
        Command::User { action } => {
            let session = Session::resolve(db, rules, &uid, settings).await?;
            user_cmd::run(&session.user(), action, ctx, &mut out).await?;
        }
        Command::Admin { action } => {
            let session = Session::resolve(db, rules, &uid, settings).await?;
            admin_cmd::run(&session.admin()?, action, ctx, &mut out).await?;
        }
        Command::Super { action } => {
            let session = Session::resolve(db, rules, &uid, settings).await?;
            super_cmd::run(&session.superadmin()?, action, ctx, &mut out).await?;
        }
    }
    Ok(())
}

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use shop_backup_auth::{AdminGuard, TokenSigner, ADMIN_ROLE};
use shop_backup_core::{BackupDocument, Value};
use shop_backup_daemon::config::{self, Config};
use shop_backup_daemon::{build_router, AppState};
use shop_backup_storage::BackupRepository;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (cfg, args) = parse_args()?;

    let root = env::var("SHOP_BACKUP_ROOT")
        .ok()
        .or_else(|| cfg.storage.root.clone())
        .unwrap_or_else(|| "./data".to_owned());

    let database_url = env::var("DATABASE_URL")
        .ok()
        .or_else(|| cfg.storage.database_url.clone());

    let database_name = env::var("DB_NAME")
        .ok()
        .or_else(|| cfg.storage.database_name.clone())
        .unwrap_or_else(|| "r32_ecommerce".to_owned());

    let repo = BackupRepository::init(PathBuf::from(&root), database_url.as_deref(), database_name).await?;

    match args.first().map(String::as_str) {
        None | Some("serve") => run_service(repo, &cfg).await,
        Some("export") => export_to_file(&repo, args.get(1)).await,
        Some("restore") => restore_from_file(&repo, args.get(1)).await,
        Some("info") => print_info(&repo).await,
        Some("issue-token") => issue_token(&repo, &cfg, args.get(1)).await,
        Some(other) => bail!("unknown mode: {other} (expected serve, export, restore, info or issue-token)"),
    }
}

/// Parse CLI args, returning the loaded config and the positional arguments.
fn parse_args() -> Result<(Config, Vec<String>)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut positional = Vec::new();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            other => positional.push(other.to_owned()),
        }
        i += 1;
    }

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok((cfg, positional))
}

fn token_signer(cfg: &Config) -> Result<TokenSigner> {
    let secret = env::var("SHOP_BACKUP_JWT_SECRET")
        .ok()
        .or_else(|| cfg.security.jwt_secret.clone())
        .context("token secret is not configured (SHOP_BACKUP_JWT_SECRET or security.jwt_secret)")?;
    let ttl_minutes = env::var("SHOP_BACKUP_TOKEN_TTL_MINUTES")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .or(cfg.security.token_ttl_minutes)
        .unwrap_or(1440);
    Ok(TokenSigner::new(secret.as_bytes(), chrono::Duration::minutes(ttl_minutes)))
}

async fn run_service(repo: BackupRepository, cfg: &Config) -> Result<()> {
    let listen = env::var("SHOP_BACKUP_LISTEN")
        .ok()
        .or_else(|| cfg.server.listen.clone())
        .unwrap_or_else(|| "127.0.0.1:8001".to_owned());

    let guard = AdminGuard::new(Arc::new(token_signer(cfg)?), repo.store());
    let state = AppState { repo, guard };

    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;
    let app = build_router(state);

    info!(%addr, "starting backup API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn export_to_file(repo: &BackupRepository, path: Option<&String>) -> Result<()> {
    let backup = repo.export().await?;
    let path = path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(backup.file_name()));
    let bytes = backup.to_pretty_json().context("serialize backup")?;
    std::fs::write(&path, &bytes).with_context(|| format!("write backup file: {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "backup written");
    Ok(())
}

async fn restore_from_file(repo: &BackupRepository, path: Option<&String>) -> Result<()> {
    let Some(path) = path else {
        bail!("restore requires a backup file path");
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("read backup file: {path}"))?;
    let backup = BackupDocument::from_json_str(&raw)?;
    let summary = repo.restore(&backup).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.success {
        bail!("restore finished with errors");
    }
    Ok(())
}

async fn print_info(repo: &BackupRepository) -> Result<()> {
    let info = repo.info().await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn issue_token(repo: &BackupRepository, cfg: &Config, user_id: Option<&String>) -> Result<()> {
    let Some(user_id) = user_id else {
        bail!("issue-token requires a user id");
    };
    let guard = AdminGuard::new(Arc::new(token_signer(cfg)?), repo.store());
    let Some(user) = guard.find_user(user_id).await? else {
        bail!("no user with id {user_id}");
    };
    if user.get("role").and_then(Value::as_str) != Some(ADMIN_ROLE) {
        warn!(%user_id, "user is not an admin; the token will be refused by backup endpoints");
    }
    println!("{}", guard.signer().issue(user_id)?);
    Ok(())
}

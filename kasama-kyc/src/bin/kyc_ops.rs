//! kyc-ops - operational consistency tooling for kasama-kyc
//!
//! Subcommands:
//! - `check-missing`: list owners whose verified flag disagrees with their
//!   submission history
//! - `heal`: create missing submission shells with safe defaults
//!
//! Exit codes: 0 success, 1 inconsistency found, 2 operational failure.

use clap::{Parser, Subcommand};
use kasama_kyc::db::{accounts, audit, submissions};
use kasama_kyc::types::{IdType, SubmissionStatus};
use sqlx::SqlitePool;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kyc-ops", about = "KYC state consistency tooling", version)]
struct Cli {
    /// Root folder override (defaults to KASAMA_ROOT_FOLDER / config / OS default)
    #[arg(long)]
    root_folder: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List owners with inconsistent verified/submission state
    CheckMissing,
    /// Create missing submission shells with safe defaults
    Heal,
}

/// An owner whose verified flag disagrees with their submission history
#[derive(Debug)]
struct Inconsistency {
    owner: uuid::Uuid,
    verified: bool,
    detail: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let pool = match open_database(cli.root_folder.as_deref()).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::CheckMissing => check_missing(&pool).await,
        Command::Heal => heal(&pool).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("Operation failed: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn open_database(root_folder: Option<&str>) -> anyhow::Result<SqlitePool> {
    let root = kasama_common::config::resolve_root_folder(
        root_folder,
        "KASAMA_ROOT_FOLDER",
        Some("root_folder"),
    )
    .map_err(|e| anyhow::anyhow!("{}", e))?;
    let initializer = kasama_common::config::RootFolderInitializer::new(root);
    let db_path = initializer.database_path();
    if !db_path.exists() {
        anyhow::bail!("Database not found at {}", db_path.display());
    }
    Ok(kasama_kyc::db::init_database_pool(&db_path).await?)
}

async fn find_inconsistencies(pool: &SqlitePool) -> anyhow::Result<Vec<Inconsistency>> {
    let mut findings = Vec::new();

    for account in accounts::list_accounts(pool).await? {
        let history = submissions::list_by_owner(pool, account.guid).await?;
        let has_approved = history
            .iter()
            .any(|s| s.status == SubmissionStatus::Approved);

        if account.verified && !has_approved {
            findings.push(Inconsistency {
                owner: account.guid,
                verified: true,
                detail: "verified flag set without an approved submission".to_string(),
            });
        }
        if !account.verified && has_approved {
            findings.push(Inconsistency {
                owner: account.guid,
                verified: false,
                detail: "approved submission exists but verified flag is unset".to_string(),
            });
        }
    }

    Ok(findings)
}

async fn check_missing(pool: &SqlitePool) -> anyhow::Result<ExitCode> {
    let findings = find_inconsistencies(pool).await?;

    if findings.is_empty() {
        info!("All owners consistent");
        return Ok(ExitCode::SUCCESS);
    }

    for finding in &findings {
        println!(
            "{}\tverified={}\t{}",
            finding.owner, finding.verified, finding.detail
        );
    }
    info!(count = findings.len(), "Inconsistencies found");
    Ok(ExitCode::from(1))
}

async fn heal(pool: &SqlitePool) -> anyhow::Result<ExitCode> {
    let findings = find_inconsistencies(pool).await?;
    let mut healed = 0usize;

    for finding in &findings {
        if !finding.verified {
            // The approved submission is the source of truth: restore the flag
            let mut tx = pool.begin().await?;
            accounts::set_verified_tx(&mut tx, finding.owner, true).await?;
            audit::append_tx(
                &mut tx,
                uuid::Uuid::nil(),
                finding.owner,
                "HEAL_VERIFIED_FLAG",
                &finding.detail,
            )
            .await?;
            tx.commit().await?;
            healed += 1;
            continue;
        }

        // Verified owner without history: create an approved shell with
        // safe defaults so listings and audits line up
        let account = match accounts::get_account(pool, finding.owner).await? {
            Some(account) => account,
            None => continue,
        };
        let shell = submissions::Submission::new(account.guid, account.kind, IdType::NationalId);
        submissions::create_submission(pool, &shell).await?;
        let mut tx = pool.begin().await?;
        submissions::set_status_tx(
            &mut tx,
            shell.guid,
            SubmissionStatus::Approved,
            Some(chrono::Utc::now()),
        )
        .await?;
        audit::append_tx(
            &mut tx,
            shell.guid,
            account.guid,
            "HEAL_SHELL_SUBMISSION",
            "created approved shell for verified owner with no history",
        )
        .await?;
        tx.commit().await?;
        healed += 1;
    }

    info!(healed, "Heal pass complete");
    Ok(ExitCode::SUCCESS)
}

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::SqlitePool;

use site_control::authz::{reconcile_roles, PermissionMatrix};
use site_control::events::audit::verify_chain;
use site_control::lifecycle::objects::repair_missing_checklists;
use site_control::models::user::CreateUserRequest;
use site_control::{db, identity};

#[derive(Parser, Debug)]
#[command(author, version, about = "site-control maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Insert missing role groups and their model permissions
    ReconcileRoles,
    /// Create the opening checklist of every ACTIVE object that lacks one
    FixMissingChecklists,
    /// Recompute the audit log hash chain
    VerifyAuditChain,
    /// Create a superuser account
    CreateSuperuser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            get_migrator().await?.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::ReconcileRoles => {
            let matrix = PermissionMatrix::from_env()?;
            let report = reconcile_roles(&pool, &matrix).await?;
            println!(
                "Role groups created: {}, permissions granted: {}",
                report.groups_created, report.permissions_granted
            );
        }
        Commands::FixMissingChecklists => {
            let repaired = repair_missing_checklists(&pool).await?;
            if repaired.is_empty() {
                println!("Every active object already has an opening checklist");
            }
            for object_id in repaired {
                println!("Created opening checklist for object {object_id}");
            }
        }
        Commands::VerifyAuditChain => {
            let report = verify_chain(&pool).await?;
            match report.broken_at {
                None => println!("Audit chain intact ({} entries)", report.entries),
                Some(id) => anyhow::bail!("audit chain broken at entry {id} ({} entries)", report.entries),
            }
        }
        Commands::CreateSuperuser {
            username,
            email,
            password,
        } => {
            let user = identity::create_user(
                &pool,
                CreateUserRequest {
                    username,
                    email,
                    password,
                    is_superuser: true,
                    is_staff: true,
                },
            )
            .await?;
            println!("Created superuser {} ({})", user.username, user.id);
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    db::connect(&database_url).await
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if tracked.is_some() {
        sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} Name", "Status", "Version");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Containers often run from another working directory.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}

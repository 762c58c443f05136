use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use meshctl_store::db::DatabaseConfig;
use tracing::{info, Level};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "meshctl")]
#[command(about = "Operator CLI for the mesh control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migrations, create the first signing CA, and create the
    /// initial IP pool for a new deployment.
    Bootstrap {
        /// Name for the initial CA.
        #[arg(long, default_value = "root-ca")]
        ca_name: String,

        /// Total CA validity in days.
        #[arg(long, default_value_t = 548)]
        ca_validity_days: i64,

        /// CIDR for the first overlay IP pool.
        #[arg(long)]
        pool_cidr: String,

        /// Human-readable description for the pool.
        #[arg(long, default_value = "default overlay")]
        pool_description: String,
    },

    /// Register a new client.
    CreateClient {
        #[arg(long)]
        name: String,

        #[arg(long)]
        owner: String,

        /// Marks the client as a lighthouse; requires --public-ip.
        #[arg(long, default_value_t = false)]
        lighthouse: bool,

        #[arg(long)]
        public_ip: Option<std::net::IpAddr>,
    },

    /// Issue a one-time enrollment code for a client, printed exactly once.
    EnrollmentCode {
        #[arg(long)]
        client_id: Uuid,

        #[arg(long)]
        device_hint: Option<String>,

        /// Code lifetime in hours.
        #[arg(long, default_value_t = 24)]
        expires_in_hours: i64,
    },

    /// List clients whose last delivered bundle predates their latest
    /// policy change (or who have never fetched at all).
    DirtyClients,

    /// Verify the policy store is reachable.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let db_config = DatabaseConfig::from_env()?;
    let pool = meshctl_store::db::create_pool(&db_config).await?;
    meshctl_store::db::run_migrations(&pool).await?;

    match cli.command {
        Commands::Bootstrap {
            ca_name,
            ca_validity_days,
            pool_cidr,
            pool_description,
        } => bootstrap(&pool, ca_name, ca_validity_days, pool_cidr, pool_description).await?,
        Commands::CreateClient {
            name,
            owner,
            lighthouse,
            public_ip,
        } => create_client(&pool, name, owner, lighthouse, public_ip).await?,
        Commands::EnrollmentCode {
            client_id,
            device_hint,
            expires_in_hours,
        } => issue_enrollment_code(&pool, client_id, device_hint, expires_in_hours).await?,
        Commands::DirtyClients => list_dirty_clients(&pool).await?,
        Commands::Health => run_health_check(&pool).await?,
    }

    Ok(())
}

async fn bootstrap(
    pool: &sqlx::PgPool,
    ca_name: String,
    ca_validity_days: i64,
    pool_cidr: String,
    pool_description: String,
) -> Result<()> {
    let now = Utc::now();
    let ca = meshctl_store::ca_repo::create_and_activate(
        pool,
        &ca_name,
        now,
        now + Duration::days(ca_validity_days),
    )
    .await
    .context("failed to create and activate the initial CA")?;

    info!(ca = ca.name.as_str(), ca_id = %ca.id, "created and activated signing CA");

    let network: ipnet::IpNet = pool_cidr
        .parse()
        .with_context(|| format!("'{pool_cidr}' is not a valid CIDR"))?;
    let ip_pool = meshctl_store::ip_repo::create_pool(pool, network, &pool_description)
        .await
        .context("failed to create the initial IP pool")?;

    info!(pool_id = %ip_pool.id, cidr = ip_pool.cidr.as_str(), "created IP pool");
    info!("bootstrap complete");

    Ok(())
}

async fn create_client(
    pool: &sqlx::PgPool,
    name: String,
    owner: String,
    lighthouse: bool,
    public_ip: Option<std::net::IpAddr>,
) -> Result<()> {
    let client = meshctl_store::client_repo::create(pool, &name, &owner, lighthouse, public_ip)
        .await
        .context("failed to create client")?;

    info!(client_id = %client.id, name = client.name.as_str(), "created client");

    Ok(())
}

async fn issue_enrollment_code(
    pool: &sqlx::PgPool,
    client_id: Uuid,
    device_hint: Option<String>,
    expires_in_hours: i64,
) -> Result<()> {
    // Reuse the same env var the server process reads so a code issued
    // here redeems correctly against that server.
    let pepper = std::env::var("TOKEN_HASH_PEPPER")
        .context("TOKEN_HASH_PEPPER must be set")?
        .into_bytes();

    let expires_at = Utc::now() + Duration::hours(expires_in_hours);
    let (code, plaintext) = meshctl_store::tokens::issue_enrollment_code(
        pool,
        client_id,
        device_hint.as_deref(),
        expires_at,
        &pepper,
    )
    .await
    .context("failed to issue enrollment code")?;

    info!(code_id = %code.id, expires_at = %code.expires_at, "issued enrollment code");
    println!("{plaintext}");

    Ok(())
}

async fn list_dirty_clients(pool: &sqlx::PgPool) -> Result<()> {
    let clients = meshctl_store::client_repo::list_pending_delivery(pool)
        .await
        .context("failed to list pending-delivery clients")?;

    if clients.is_empty() {
        info!("no clients are pending delivery");
        return Ok(());
    }

    for client in clients {
        println!(
            "{}\t{}\t{}\tdirty_at={}",
            client.id,
            client.name,
            client.owner,
            client.config_dirty_at
        );
    }

    Ok(())
}

async fn run_health_check(pool: &sqlx::PgPool) -> Result<()> {
    meshctl_store::db::health_check(pool).await?;
    info!("policy store is reachable");
    Ok(())
}

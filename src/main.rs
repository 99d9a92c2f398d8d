use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use petcare_lib::{
    check_connection, config, Config, GoTrueProvider, IdentityProvider, IdentitySync,
    MemoryIdentityProvider, MemoryProfileStore, PostgrestProfileStore, ProfileStore, SessionFile,
    SyncConfig, SyncState,
};

/// Session and profile sync tooling for the petcare backend
#[derive(Parser)]
#[command(name = "petcare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Seconds to wait for the mirror to settle
    #[arg(long, global = true, default_value_t = 15)]
    wait: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the session and profile read paths of the configured backend
    Check,

    /// Sign in with email and password and print the resulting snapshot
    SignIn {
        #[arg(long, env = "PETCARE_EMAIL")]
        email: String,
        #[arg(long, env = "PETCARE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account with a profile, then sign in
    SignUp {
        #[arg(long, env = "PETCARE_EMAIL")]
        email: String,
        #[arg(long, env = "PETCARE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Display name stored on the profile
        #[arg(long)]
        name: Option<String>,
    },

    /// Revoke the stored session and forget it
    SignOut,

    /// Print the redirect URL for a federated sign-in
    Federated {
        #[arg(long, default_value = "google")]
        provider: String,
    },

    /// Run the sync core against in-memory backends and print every snapshot
    Demo,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for a settled snapshot that satisfies `accept`
async fn settled_where(
    sync: &IdentitySync,
    limit: Duration,
    accept: impl Fn(&SyncState) -> bool,
) -> Result<SyncState> {
    let mut updates = sync.subscribe();
    let current = sync.snapshot().await;
    if current.phase().is_settled() && accept(&current) {
        return Ok(current);
    }

    tokio::time::timeout(limit, async {
        loop {
            let state = updates.recv().await.context("snapshot stream closed")?;
            if state.phase().is_settled() && accept(&state) {
                return Ok::<_, anyhow::Error>(state);
            }
        }
    })
    .await
    .map_err(|_| anyhow!("mirror did not settle within {:?}", limit))?
}

async fn start_sync(
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn ProfileStore>,
    sync_config: SyncConfig,
    limit: Duration,
) -> Result<IdentitySync> {
    let sync = IdentitySync::new(provider, store, sync_config);
    sync.start().await?;
    let initial = sync.wait_until_settled(limit).await?;
    debug!(phase = ?initial.phase(), "Initial state settled");
    Ok(sync)
}

async fn run_demo(limit: Duration) -> Result<()> {
    let provider = Arc::new(MemoryIdentityProvider::new());
    let store = Arc::new(MemoryProfileStore::new());

    let sync = IdentitySync::new(provider.clone(), store.clone(), SyncConfig::default());
    let mut updates = sync.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(state) = updates.recv().await {
            if let Ok(line) = serde_json::to_string(&state) {
                println!("{}", line);
            }
        }
    });

    sync.start().await?;
    sync.wait_until_settled(limit).await?;

    sync.sign_up_with_credentials("demo@petcare.app", "demo-password", Some("Mochi"))
        .await?;
    settled_where(&sync, limit, SyncState::is_authenticated).await?;

    if let Some(profile) = sync.refetch_profile().await? {
        info!(identity = %profile.id, crystals = profile.primary_balance, "Profile refetched");
    }

    sync.sign_out().await?;
    settled_where(&sync, limit, |state| !state.is_authenticated()).await?;

    sync.teardown().await;
    drop(sync);
    printer.abort();
    Ok(())
}

/// Configuration plus the HTTP provider and store it describes
///
/// The provider picks up the session stored by an earlier command.
async fn hosted() -> Result<(Config, Arc<GoTrueProvider>, Arc<PostgrestProfileStore>)> {
    let config = config::load_config().await?;
    let session_file = SessionFile::new(config::session_path());
    debug!(path = %session_file.path().display(), "Using session file");

    let provider = GoTrueProvider::new(&config.backend)?.with_session_file(session_file);
    provider.restore_persisted().await?;
    let store = PostgrestProfileStore::new(&config.backend, &config.profiles, provider.bearer())?;
    info!(backend = %config.backend.url, "Using hosted backend");
    Ok((config, Arc::new(provider), Arc::new(store)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "petcare=debug,petcare_lib=debug,petcare_lib::events=info,warn".into()
            } else {
                "petcare=info,petcare_lib=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    match env_file_path {
        Some(path) => debug!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let cli = Cli::parse();
    let limit = Duration::from_secs(cli.wait);

    match cli.command {
        Commands::Demo => run_demo(limit).await?,
        Commands::Check => {
            let (_, provider, store) = hosted().await?;
            let report = check_connection(provider.as_ref(), store.as_ref()).await;
            print_json(&report)?;
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }
        Commands::SignIn { email, password } => {
            let (config, provider, store) = hosted().await?;
            let sync = start_sync(provider, store, config.sync, limit).await?;
            sync.sign_in_with_credentials(&email, &password).await?;
            let state = settled_where(&sync, limit, SyncState::is_authenticated).await?;
            print_json(&state)?;
            sync.teardown().await;
        }
        Commands::SignUp {
            email,
            password,
            name,
        } => {
            let (config, provider, store) = hosted().await?;
            let sync = start_sync(provider, store, config.sync, limit).await?;
            sync.sign_up_with_credentials(&email, &password, name.as_deref())
                .await?;
            let state = settled_where(&sync, limit, SyncState::is_authenticated).await?;
            print_json(&state)?;
            sync.teardown().await;
        }
        Commands::SignOut => {
            let (_, provider, _) = hosted().await?;
            provider.sign_out().await?;
            info!("Signed out");
        }
        Commands::Federated { provider: name } => {
            let (_, provider, _) = hosted().await?;
            let redirect = provider.sign_in_with_federated(&name).await?;
            print_json(&redirect)?;
        }
    }

    Ok(())
}

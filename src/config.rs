use anyhow::{Context, Result, bail};
use clap::Parser;
use std::env;

use crate::models::chunk::DEFAULT_CHUNK_SIZE;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub chunk_size: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Personal file and link library storage engine")]
pub struct Args {
    /// Host to bind to (overrides KNOWLEDGE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides KNOWLEDGE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides KNOWLEDGE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Chunk payload size in bytes (overrides KNOWLEDGE_STORE_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read an optional numeric environment variable.
fn env_number<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("KNOWLEDGE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number::<u16>("KNOWLEDGE_STORE_PORT")?.unwrap_or(3000);
        let env_db = env::var("KNOWLEDGE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/knowledge_store.db".into());
        let env_chunk =
            env_number::<usize>("KNOWLEDGE_STORE_CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            chunk_size: args.chunk_size.unwrap_or(env_chunk),
        };

        if cfg.chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

use crate::services::{backend::ensure_bucket_name_safe, item_store::DEFAULT_LIST_MAX_ITEMS};

const DEFAULT_BUCKET: &str = "primary-data-bucket";
const DEFAULT_AUTH_API_URL: &str = "https://your-auth-api-url/auth/validate";
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUIRED_FIELDS: [&str; 2] = ["name", "description"];

/// Which object backend holds the items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// SQLite metadata plus payload files under the storage directory
    Disk,
    /// Process memory; everything is lost on exit
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub database_url: String,
    pub auth_api_url: String,
    pub auth_timeout: Duration,
    pub auth_enabled: bool,
    pub list_max_items: usize,
    pub fetch_concurrency: usize,
    pub required_fields: Vec<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multi-tenant JSON item service over an object store")]
pub struct Args {
    /// Host to bind to (overrides ITEM_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ITEM_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket the items live in (overrides PRIMARY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Object backend (overrides ITEM_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory where object payloads are stored (overrides ITEM_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides ITEM_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Token validation endpoint (overrides AUTH_API_URL)
    #[arg(long)]
    pub auth_api_url: Option<String>,

    /// Timeout for token validation calls, in seconds (overrides ITEM_STORE_AUTH_TIMEOUT_SECS)
    #[arg(long)]
    pub auth_timeout_secs: Option<u64>,

    /// Serve item routes without token validation (or set ITEM_STORE_DISABLE_AUTH=1)
    #[arg(long)]
    pub disable_auth: bool,

    /// Cap on keys listed per query (overrides ITEM_STORE_LIST_MAX_ITEMS)
    #[arg(long)]
    pub list_max_items: Option<usize>,

    /// Bodies fetched at once while querying (overrides ITEM_STORE_FETCH_CONCURRENCY)
    #[arg(long)]
    pub fetch_concurrency: Option<usize>,

    /// Comma-separated fields required on create (overrides ITEM_STORE_REQUIRED_FIELDS)
    #[arg(long, value_delimiter = ',')]
    pub required_fields: Option<Vec<String>>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_args_and_env(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables `lookup` yields, then validate.
    pub fn from_args_and_env(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = lookup("ITEM_STORE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var::<u16>(&lookup, "ITEM_STORE_PORT")?.unwrap_or(3000);
        let env_bucket = lookup("PRIMARY_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into());
        let env_backend = match lookup("ITEM_STORE_BACKEND") {
            Some(value) => <BackendKind as ValueEnum>::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("parsing ITEM_STORE_BACKEND value `{}`", value))?,
            None => BackendKind::Disk,
        };
        let env_storage =
            lookup("ITEM_STORE_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("ITEM_STORE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/item_store.db".into());
        let env_auth_url = lookup("AUTH_API_URL").unwrap_or_else(|| DEFAULT_AUTH_API_URL.into());
        let env_auth_timeout = parse_var::<u64>(&lookup, "ITEM_STORE_AUTH_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_AUTH_TIMEOUT_SECS);
        let env_disable_auth = lookup("ITEM_STORE_DISABLE_AUTH")
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let env_max_items =
            parse_var::<usize>(&lookup, "ITEM_STORE_LIST_MAX_ITEMS")?.unwrap_or(DEFAULT_LIST_MAX_ITEMS);
        let env_concurrency = parse_var::<usize>(&lookup, "ITEM_STORE_FETCH_CONCURRENCY")?.unwrap_or(1);
        let env_required = lookup("ITEM_STORE_REQUIRED_FIELDS")
            .map(|value| split_fields(&value))
            .unwrap_or_else(|| DEFAULT_REQUIRED_FIELDS.map(String::from).to_vec());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            bucket: args.bucket.unwrap_or(env_bucket),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            auth_api_url: args.auth_api_url.unwrap_or(env_auth_url),
            auth_timeout: Duration::from_secs(args.auth_timeout_secs.unwrap_or(env_auth_timeout)),
            auth_enabled: !(args.disable_auth || env_disable_auth),
            list_max_items: args.list_max_items.unwrap_or(env_max_items),
            fetch_concurrency: args.fetch_concurrency.unwrap_or(env_concurrency),
            required_fields: args
                .required_fields
                .map(|fields| fields.into_iter().map(|f| f.trim().to_string()).collect())
                .unwrap_or(env_required),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure_bucket_name_safe(&self.bucket).context("validating bucket name")?;
        if self.auth_timeout.is_zero() {
            bail!("auth timeout must be at least one second");
        }
        if self.list_max_items == 0 {
            bail!("list max items must be positive");
        }
        if self.fetch_concurrency == 0 {
            bail!("fetch concurrency must be positive");
        }
        if self.required_fields.iter().any(String::is_empty) {
            bail!("required fields must not contain empty names");
        }
        if self.auth_enabled {
            reqwest::Url::parse(&self.auth_api_url)
                .with_context(|| format!("parsing auth API URL `{}`", self.auth_api_url))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}

fn split_fields(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("item-store").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_without_env_or_args() {
        let cfg = AppConfig::from_args_and_env(Args::default(), env(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.bucket, "primary-data-bucket");
        assert_eq!(cfg.backend, BackendKind::Disk);
        assert_eq!(cfg.auth_timeout, Duration::from_secs(5));
        assert!(cfg.auth_enabled);
        assert_eq!(cfg.list_max_items, 1000);
        assert_eq!(cfg.fetch_concurrency, 1);
        assert_eq!(cfg.required_fields, vec!["name", "description"]);
    }

    #[test]
    fn env_overrides_defaults_and_args_override_env() {
        let vars = env(&[
            ("ITEM_STORE_PORT", "8080"),
            ("PRIMARY_BUCKET", "env-bucket"),
            ("ITEM_STORE_BACKEND", "MEMORY"),
            ("ITEM_STORE_DISABLE_AUTH", "true"),
            ("ITEM_STORE_REQUIRED_FIELDS", "title, body"),
        ]);
        let cfg = AppConfig::from_args_and_env(
            args(&["--port", "9090", "--required-fields", "a,b,c"]),
            vars,
        )
        .unwrap();

        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.bucket, "env-bucket");
        assert_eq!(cfg.backend, BackendKind::Memory);
        assert!(!cfg.auth_enabled);
        assert_eq!(cfg.required_fields, vec!["a", "b", "c"]);
    }

    #[test]
    fn env_required_fields_are_trimmed() {
        let cfg = AppConfig::from_args_and_env(
            Args::default(),
            env(&[("ITEM_STORE_REQUIRED_FIELDS", "title, body,")]),
        )
        .unwrap();
        assert_eq!(cfg.required_fields, vec!["title", "body"]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(
            AppConfig::from_args_and_env(Args::default(), env(&[("ITEM_STORE_PORT", "http")]))
                .is_err()
        );
        assert!(
            AppConfig::from_args_and_env(Args::default(), env(&[("PRIMARY_BUCKET", "No_Caps")]))
                .is_err()
        );
        assert!(
            AppConfig::from_args_and_env(args(&["--fetch-concurrency", "0"]), env(&[])).is_err()
        );
        assert!(
            AppConfig::from_args_and_env(args(&["--auth-api-url", "not a url"]), env(&[]))
                .is_err()
        );
        assert!(
            AppConfig::from_args_and_env(
                Args::default(),
                env(&[("ITEM_STORE_BACKEND", "s3")])
            )
            .is_err()
        );
    }
}

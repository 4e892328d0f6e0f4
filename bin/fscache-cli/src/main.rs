//! fscache CLI - Admin Command Line Interface
//!
//! This binary inspects and maintains a cache directory: reading and writing
//! single entries, listing entries, clearing by mode and tags, pruning empty
//! shard directories and reporting capabilities.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fscache_common::{FilesystemOptions, MatchMode};
use fscache_storage::{CasToken, FilesystemCache, FindOptions, ItemOptions, ScanField, ScanItem};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fscache-cli")]
#[command(about = "fscache Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "FSCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache directory
    #[arg(short = 'd', long, env = "FSCACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Namespace of the entries
    #[arg(short, long)]
    namespace: Option<String>,

    /// Shard directory levels (0-16)
    #[arg(long)]
    dir_level: Option<u8>,

    /// Default time-to-live in seconds (0 = never expires)
    #[arg(long)]
    ttl: Option<u64>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the value of a key
    Get {
        key: String,
        /// Print value and CAS token as JSON
        #[arg(long)]
        token: bool,
    },
    /// Store a value (read from stdin when omitted)
    Set {
        key: String,
        value: Option<String>,
        /// Tag to attach (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Only store if the key does not exist
        #[arg(long, conflicts_with_all = ["replace", "cas"])]
        add: bool,
        /// Only store if the key exists
        #[arg(long, conflicts_with = "cas")]
        replace: bool,
        /// Only store if the entry still matches this token
        #[arg(long)]
        cas: Option<CasToken>,
    },
    /// Remove keys
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Reset the mtime of keys
    Touch {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Show metadata of a key
    Metadata { key: String },
    /// List entries as JSON lines
    List {
        /// Matching mode, e.g. `active`, `expired|tags-or`
        #[arg(short, long, default_value = "active")]
        mode: MatchMode,
        /// Tag compared by the mode's tag bits (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Fields to print
        #[arg(short, long, value_delimiter = ',', default_values_t = [Field::Key, Field::Mtime])]
        select: Vec<Field>,
    },
    /// Remove matching entries
    Clear {
        /// Matching mode, e.g. `expired`, `all|tags-and`
        #[arg(short, long, default_value = "expired")]
        mode: MatchMode,
        /// Tag compared by the mode's tag bits (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Clear every namespace instead of the configured one
        #[arg(long)]
        all_namespaces: bool,
    },
    /// Remove empty shard directories
    Optimize,
    /// Show capabilities and capacity
    Info,
}

/// Projectable scan field
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Field {
    Key,
    Value,
    Mtime,
    Ctime,
    Atime,
    Filespec,
    Tags,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self
            .to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_default();
        f.write_str(&name)
    }
}

impl From<Field> for ScanField {
    fn from(field: Field) -> Self {
        match field {
            Field::Key => Self::Key,
            Field::Value => Self::Value,
            Field::Mtime => Self::Mtime,
            Field::Ctime => Self::Ctime,
            Field::Atime => Self::Atime,
            Field::Filespec => Self::Filespec,
            Field::Tags => Self::Tags,
        }
    }
}

/// Configuration file structure
#[derive(Debug, Default, Deserialize)]
struct Config {
    #[serde(default)]
    cache: FilesystemOptions,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Merge CLI args into the file options (CLI takes precedence)
fn apply_overrides(args: &Args, mut options: FilesystemOptions) -> FilesystemOptions {
    if let Some(dir) = &args.cache_dir {
        options.cache_dir = Some(dir.clone());
    }
    if let Some(namespace) = &args.namespace {
        options.namespace.clone_from(namespace);
    }
    if let Some(level) = args.dir_level {
        options.dir_level = level;
    }
    if let Some(ttl) = args.ttl {
        options.ttl = ttl;
    }
    options
}

fn scan_item_json(item: ScanItem) -> Value {
    let mut obj = Map::new();
    obj.insert("key".into(), json!(item.key));
    if let Some(value) = item.value {
        obj.insert("value".into(), json!(String::from_utf8_lossy(&value)));
    }
    if let Some(mtime) = item.mtime {
        obj.insert("mtime".into(), json!(mtime));
    }
    if let Some(ctime) = item.ctime {
        obj.insert("ctime".into(), json!(ctime));
    }
    if let Some(atime) = item.atime {
        obj.insert("atime".into(), json!(atime));
    }
    if let Some(filespec) = item.filespec {
        obj.insert("filespec".into(), json!(filespec.display().to_string()));
    }
    if let Some(tags) = item.tags {
        obj.insert("tags".into(), json!(tags));
    }
    Value::Object(obj)
}

fn run(cache: &FilesystemCache, command: Commands) -> Result<()> {
    let none = ItemOptions::default();
    let mut stdout = std::io::stdout().lock();

    match command {
        Commands::Get { key, token } => {
            if token {
                let (value, token) = cache
                    .get_with_token(&key, &none)?
                    .with_context(|| format!("key '{key}' not found"))?;
                let out = json!({
                    "key": key,
                    "value": String::from_utf8_lossy(&value),
                    "token": token.to_string(),
                });
                writeln!(stdout, "{out}")?;
            } else {
                let value = cache
                    .get_item(&key, &none)?
                    .with_context(|| format!("key '{key}' not found"))?;
                stdout.write_all(&value)?;
            }
        }
        Commands::Set {
            key,
            value,
            tags,
            add,
            replace,
            cas,
        } => {
            let value = match value {
                Some(value) => value.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            let opts = ItemOptions::default().tags(tags);
            let stored = if add {
                cache.add_item(&key, &value, &opts)?
            } else if replace {
                cache.replace_item(&key, &value, &opts)?
            } else if let Some(token) = cas {
                cache.check_and_set_item(&token, &key, &value, &opts)?
            } else {
                cache.set_item(&key, &value, &opts)?
            };
            anyhow::ensure!(stored, "key '{key}' was not stored");
            info!("Stored '{}' ({} bytes)", key, value.len());
        }
        Commands::Remove { keys } => {
            let failed = cache.remove_items(&keys, &none)?;
            anyhow::ensure!(failed.is_empty(), "not removed: {}", failed.join(", "));
        }
        Commands::Touch { keys } => {
            let failed = cache.touch_items(&keys, &none)?;
            anyhow::ensure!(failed.is_empty(), "not touched: {}", failed.join(", "));
        }
        Commands::Metadata { key } => {
            let meta = cache
                .get_metadata(&key, &none)?
                .with_context(|| format!("key '{key}' not found"))?;
            writeln!(stdout, "{}", serde_json::to_string_pretty(&meta)?)?;
        }
        Commands::List { mode, tags, select } => {
            let opts = FindOptions::default()
                .tags(tags)
                .select(select.into_iter().map(ScanField::from).collect::<Vec<_>>());
            cache.find(mode, &opts)?;
            let mut count = 0usize;
            while let Some(item) = cache.fetch()? {
                writeln!(stdout, "{}", scan_item_json(item))?;
                count += 1;
            }
            debug!("Listed {} entries", count);
        }
        Commands::Clear {
            mode,
            tags,
            all_namespaces,
        } => {
            let opts = FindOptions::default().tags(tags);
            if all_namespaces {
                cache.clear(mode, &opts)?;
            } else {
                cache.clear_by_namespace(mode, &opts)?;
            }
        }
        Commands::Optimize => {
            cache.optimize(&none)?;
        }
        Commands::Info => {
            let out = json!({
                "cache_dir": cache.options().cache_dir,
                "namespace": cache.options().namespace,
                "capabilities": cache.capabilities(),
                "capacity": cache.capacity()?,
            });
            writeln!(stdout, "{}", serde_json::to_string_pretty(&out)?)?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file if given
    let config = load_config(args.config.as_deref())?;
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = apply_overrides(&args, config.cache);
    let cache = FilesystemCache::new(options).context("failed to open cache")?;

    run(&cache, args.command)
}

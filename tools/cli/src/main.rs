//! OmniStore CLI - Command line interface for storage operations.
//!
//! This tool drives any configured storage backend (filesystem, S3, GCS)
//! through the common storage contract, and packs or unpacks ZIP archives.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use omnistore_common::{ObjectKey, Permissions};
use omnistore_storage::{create_default_registry, zipper, StorageProvider};

#[derive(Parser)]
#[command(name = "omnistore")]
#[command(about = "OmniStore - One interface over local, S3 and GCS storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Backend configuration file (JSON).
    #[arg(short, long, env = "OMNISTORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a local file.
    Put {
        /// Source file.
        source: PathBuf,

        /// Destination key.
        key: String,

        /// Make the object publicly readable.
        #[arg(long)]
        public: bool,

        /// Content type; sniffed from the file when omitted.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Retrieve an object into a local file.
    Get {
        /// Object key.
        key: String,

        /// Destination file path.
        dest: PathBuf,
    },

    /// List objects directly under a prefix.
    Ls {
        /// Prefix (default: root).
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Copy an object within the backend.
    Cp {
        /// Source key.
        source: String,

        /// Target key.
        target: String,
    },

    /// Delete an object or everything under a prefix.
    Rm {
        /// Key or prefix.
        key: String,
    },

    /// Make an object publicly readable.
    Publish {
        /// Object key.
        key: String,
    },

    /// Make an object private.
    Unpublish {
        /// Object key.
        key: String,
    },

    /// Print the external URL of an object.
    Url {
        /// Path parts, joined with `/`.
        #[arg(required = true)]
        parts: Vec<String>,
    },

    /// Pack local files into a ZIP archive.
    Zip {
        /// Archive to create.
        output: PathBuf,

        /// Files to include; missing files are skipped.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Extract a ZIP archive, skipping files that already exist.
    Unzip {
        /// Archive to extract.
        archive: PathBuf,

        /// Destination directory.
        dest: PathBuf,
    },
}

/// Contents of the configuration file.
#[derive(Debug, Deserialize)]
struct StoreConfig {
    /// Registered provider name (`filesystem`, `local`, `s3`, `gcs`).
    provider: String,
    /// Provider-specific configuration.
    #[serde(default)]
    config: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Zip { output, files } => cmd_zip(&output, &files),

        Commands::Unzip { archive, dest } => cmd_unzip(&archive, &dest),

        command => {
            let provider = open_provider(cli.config.as_deref())?;
            run(provider.as_ref(), command).await
        }
    }
}

/// Default configuration location under the user's config directory.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("omnistore").join("config.json"))
}

/// Load the configuration file and resolve its provider.
fn open_provider(explicit: Option<&Path>) -> Result<Arc<dyn StorageProvider>> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .context("No configuration file given and no config directory available")?;

    let config = load_config(&path)?;
    info!("Using {} backend from {}", config.provider, path.display());

    create_default_registry()
        .resolve(&config.provider, config.config)
        .with_context(|| format!("Failed to initialize '{}' backend", config.provider))
}

fn load_config(path: &Path) -> Result<StoreConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid configuration {}", path.display()))
}

fn parse_key(key: &str) -> Result<ObjectKey> {
    ObjectKey::parse(key).with_context(|| format!("Invalid key '{}'", key))
}

async fn run(provider: &dyn StorageProvider, command: Commands) -> Result<()> {
    match command {
        Commands::Put {
            source,
            key,
            public,
            content_type,
        } => cmd_put(provider, &source, &key, public, content_type.as_deref()).await,

        Commands::Get { key, dest } => cmd_get(provider, &key, &dest).await,

        Commands::Ls { prefix } => cmd_ls(provider, &prefix).await,

        Commands::Cp { source, target } => {
            provider
                .copy(&parse_key(&source)?, &parse_key(&target)?)
                .await
                .context("Failed to copy object")?;
            println!("Copied {} -> {}", source, target);
            Ok(())
        }

        Commands::Rm { key } => {
            provider
                .delete(&parse_key(&key)?)
                .await
                .context("Failed to delete")?;
            println!("Deleted: {}", key);
            Ok(())
        }

        Commands::Publish { key } => {
            provider
                .publish(&parse_key(&key)?)
                .await
                .context("Failed to publish object")?;
            println!("Published: {}", key);
            Ok(())
        }

        Commands::Unpublish { key } => {
            provider
                .unpublish(&parse_key(&key)?)
                .await
                .context("Failed to unpublish object")?;
            println!("Unpublished: {}", key);
            Ok(())
        }

        Commands::Url { parts } => {
            let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
            let url = provider
                .absolute_url(&parts)
                .context("Failed to compose URL")?;
            println!("{}", url);
            Ok(())
        }

        Commands::Zip { output, files } => cmd_zip(&output, &files),

        Commands::Unzip { archive, dest } => cmd_unzip(&archive, &dest),
    }
}

/// Store a local file.
async fn cmd_put(
    provider: &dyn StorageProvider,
    source: &Path,
    key: &str,
    public: bool,
    content_type: Option<&str>,
) -> Result<()> {
    let object = parse_key(key)?;
    let permissions = if public {
        Permissions::PublicRead
    } else {
        Permissions::Private
    };

    let stored = match content_type {
        Some(content_type) => {
            let file = tokio::fs::File::open(source)
                .await
                .with_context(|| format!("Failed to open {}", source.display()))?;
            provider
                .store_stream(&object, Box::pin(file), Some(content_type), permissions)
                .await
        }
        None => provider.store_file(&object, source, permissions).await,
    };
    stored.context("Failed to store file")?;

    println!("Stored {} as {} ({})", source.display(), key, permissions);
    Ok(())
}

/// Retrieve an object into a local file.
async fn cmd_get(provider: &dyn StorageProvider, key: &str, dest: &Path) -> Result<()> {
    let mut reader = provider
        .retrieve(&parse_key(key)?)
        .await
        .context("Failed to retrieve object")?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .context("Failed to create output file")?;
    let written = tokio::io::copy(&mut reader, &mut file)
        .await
        .context("Failed to write output file")?;

    println!("Retrieved {} -> {} ({} bytes)", key, dest.display(), written);
    Ok(())
}

/// List objects directly under a prefix.
async fn cmd_ls(provider: &dyn StorageProvider, prefix: &str) -> Result<()> {
    let entries = provider
        .list(&parse_key(prefix)?)
        .await
        .context("Failed to list objects")?;

    if entries.is_empty() {
        println!("No objects.");
    } else {
        for entry in entries {
            println!("{}", entry);
        }
    }

    Ok(())
}

/// Pack local files into an archive.
fn cmd_zip(output: &Path, files: &[PathBuf]) -> Result<()> {
    let archive = zipper::compress_files(files, output).context("Failed to create archive")?;
    println!("Archive written: {}", archive.display());
    Ok(())
}

/// Extract an archive.
fn cmd_unzip(archive: &Path, dest: &Path) -> Result<()> {
    let outputs = zipper::decompress(dest, archive).context("Failed to extract archive")?;
    println!("Extracted {} files into {}", outputs.len(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_put_public_flag() {
        let cli = Cli::try_parse_from(["omnistore", "put", "a.txt", "docs/a.txt", "--public"])
            .unwrap();
        match cli.command {
            Commands::Put { key, public, .. } => {
                assert_eq!(key, "docs/a.txt");
                assert!(public);
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"provider": "local", "config": {"root": "/tmp/omnistore"}}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.provider, "local");
        assert_eq!(config.config["root"], "/tmp/omnistore");
    }

    #[tokio::test]
    async fn test_put_get_through_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(
            &config,
            serde_json::json!({
                "provider": "filesystem",
                "config": { "root": dir.path().join("store") }
            })
            .to_string(),
        )
        .unwrap();

        let source = dir.path().join("in.txt");
        std::fs::write(&source, b"hello").unwrap();
        let provider = open_provider(Some(config.as_path())).unwrap();

        run(
            provider.as_ref(),
            Commands::Put {
                source,
                key: "docs/in.txt".to_string(),
                public: false,
                content_type: None,
            },
        )
        .await
        .unwrap();

        let dest = dir.path().join("out.txt");
        cmd_get(provider.as_ref(), "docs/in.txt", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }
}

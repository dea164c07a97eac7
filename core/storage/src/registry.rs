//! Provider registry for dynamic provider resolution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::gcs::{GcsConfig, GcsProvider};
use crate::local::{FilesystemConfig, FilesystemProvider};
use crate::provider::StorageProvider;
use crate::s3::{S3Config, S3Provider};
use omnistore_common::{Error, Result};

/// Factory function type for creating providers.
pub type ProviderFactory = Box<dyn Fn(Value) -> Result<Arc<dyn StorageProvider>> + Send + Sync>;

/// Registry for storage provider factories.
///
/// Allows dynamic registration and resolution of storage providers
/// by name and configuration.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Preconditions
    /// - `name` must be unique within the registry
    ///
    /// # Postconditions
    /// - Factory is registered and can be resolved by name
    ///
    /// # Errors
    /// - Returns `Conflict` if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a provider by name and configuration.
    ///
    /// # Preconditions
    /// - Provider must be registered
    /// - Configuration must be valid for the provider
    ///
    /// # Errors
    /// - Provider not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn StorageProvider>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!("Provider '{}' is not registered", name))
        })?;
        factory(config)
    }

    /// Get list of registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_config<T: DeserializeOwned>(provider: &str, config: Value) -> Result<T> {
    serde_json::from_value(config).map_err(|e| {
        Error::InvalidInput(format!("Invalid {} configuration: {}", provider, e))
    })
}

fn filesystem_factory() -> ProviderFactory {
    Box::new(|config| {
        let config: FilesystemConfig = parse_config("filesystem", config)?;
        Ok(Arc::new(FilesystemProvider::from_config(config)?))
    })
}

/// Create a registry with the built-in backends.
///
/// `filesystem` is also registered as `local`.
pub fn create_default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.factories.insert("filesystem".to_string(), filesystem_factory());
    registry.factories.insert("local".to_string(), filesystem_factory());

    registry.factories.insert(
        "s3".to_string(),
        Box::new(|config| {
            let config: S3Config = parse_config("s3", config)?;
            Ok(Arc::new(S3Provider::new(config)))
        }),
    );

    registry.factories.insert(
        "gcs".to_string(),
        Box::new(|config| {
            let config: GcsConfig = parse_config("gcs", config)?;
            Ok(Arc::new(GcsProvider::new(config)?))
        }),
    );

    registry
}

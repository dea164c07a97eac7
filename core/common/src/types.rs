//! Common types used throughout OmniStore.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// Hierarchical name of a stored object, independent of the backend.
///
/// Locally the components become path segments under the storage root;
/// remotely they are joined with `/` into a flat object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey {
    components: Vec<String>,
}

impl ObjectKey {
    /// The empty key, addressing the whole bucket or root directory.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a key from individual components.
    ///
    /// # Errors
    /// - Any component is empty, `.`, `..`, or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a `/`-separated key.
    ///
    /// Leading and trailing separators are ignored, so `"/a/b/"` and
    /// `"a/b"` address the same object.
    pub fn parse(key: &str) -> crate::Result<Self> {
        let trimmed = key.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = trimmed.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root key.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent key, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the last component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this key with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the key components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Render as a flat object key (`a/b/c`, empty for root).
    pub fn as_key(&self) -> String {
        self.components.join("/")
    }

    /// Render as a listing prefix (`a/b/`, empty for root).
    pub fn as_prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}/", self.as_key())
        }
    }

    /// Resolve against a local root directory.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in &self.components {
            path.push(component);
        }
        path
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Key component cannot be empty".to_string(),
        ));
    }
    if comp == "." || comp == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "Key component cannot be '{}'",
            comp
        )));
    }
    if comp.contains('/') || comp.contains('\\') {
        return Err(crate::Error::InvalidInput(
            "Key component cannot contain separators".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.as_key()
    }
}

/// Object-level access control requested at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permissions {
    /// Anyone may read the object.
    PublicRead,
    /// Only the bucket owner may read the object.
    Private,
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permissions::PublicRead => write!(f, "public-read"),
            Permissions::Private => write!(f, "private"),
        }
    }
}

/// Credential string that zeroizes on drop and never prints itself.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret for handing to a client library.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

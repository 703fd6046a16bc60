//! Structured entity paths.
//!
//! An `EntityPath` names an entry relative to the user's storage root as a
//! list of components. Containment is decided component-wise, so `a/b` is
//! inside `a` but `ab` is not. The derived ordering is component-wise too,
//! which makes a sorted set of paths a pre-order listing: every path sorts
//! directly before its own descendants.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Separator used in the string form of a path.
const SEPARATOR: char = '/';

/// A location in the user's file tree, relative to the storage root.
/// The empty path is the storage root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityPath {
    components: Vec<String>,
}

impl EntityPath {
    /// The storage root.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a `/`-separated path. Leading and trailing separators are
    /// ignored; empty, `.` and `..` components are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::from_components(trimmed.split(SEPARATOR))
    }

    /// Builds a path from individual components.
    pub fn from_components<I, S>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for component in components {
            let component = component.into();
            validate_component(&component)?;
            out.push(component);
        }
        Ok(Self { components: out })
    }

    /// Converts a path relative to the storage root. Only normal components
    /// are accepted; anything that could escape the root is an error.
    pub fn from_relative(path: &Path) -> Result<Self> {
        let mut out = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| {
                        Error::InvalidPath(format!("non UTF-8 component in {}", path.display()))
                    })?;
                    validate_component(name)?;
                    out.push(name.to_string());
                }
                Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidPath(format!(
                        "{} is not a plain relative path",
                        path.display()
                    )));
                }
            }
        }
        Ok(Self { components: out })
    }

    /// Whether this is the storage root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components. The root has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// The last component, `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// The containing path, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Appends one component.
    pub fn join(&self, name: &str) -> Result<Self> {
        validate_component(name)?;
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { components })
    }

    /// Whether `self` equals `other` or lies inside it.
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        self.components.starts_with(&other.components)
    }

    /// Whether `self` strictly contains `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.depth() > self.depth() && other.starts_with(self)
    }

    /// Iterates over the components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    /// Resolves this path below a local storage root.
    #[must_use]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        out.extend(&self.components);
        out
    }
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty() || component == "." || component == ".." {
        return Err(Error::InvalidPath(format!("invalid component {component:?}")));
    }
    if component.contains(SEPARATOR) || component.contains('\\') {
        return Err(Error::InvalidPath(format!(
            "component {component:?} contains a separator"
        )));
    }
    Ok(())
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.components.join("/"))
    }
}

impl FromStr for EntityPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<EntityPath> for String {
    fn from(path: EntityPath) -> Self {
        path.to_string()
    }
}

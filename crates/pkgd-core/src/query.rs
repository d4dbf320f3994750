//! Read-only query types.
//!
//! Queries against the engine answer with a tagged [`Lookup`] instead of a
//! bare `null`, so callers can tell a missing package from an attribute the
//! daemon does not expose.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tagged result of a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Lookup<T> {
    /// The value was found.
    Found(T),
    /// The subject (package, repository, key) does not exist.
    NotFound,
    /// The subject exists but the requested attribute is not exposed or has
    /// a different type.
    Unsupported,
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}

/// Package attributes exposed through `GetAttribute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageAttribute {
    /// One-line summary.
    Summary,
    /// Long description.
    Description,
    /// Size in bytes.
    Size,
    /// Upstream URL.
    Url,
    /// License string.
    License,
    /// Names this package requires.
    Requires,
    /// Names this package obsoletes.
    Obsoletes,
    /// Repository id.
    Repoid,
}

impl PackageAttribute {
    /// Every exposed attribute.
    pub const ALL: [Self; 8] = [
        Self::Summary,
        Self::Description,
        Self::Size,
        Self::Url,
        Self::License,
        Self::Requires,
        Self::Obsoletes,
        Self::Repoid,
    ];

    /// Returns the wire name of the attribute.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Description => "description",
            Self::Size => "size",
            Self::Url => "url",
            Self::License => "license",
            Self::Requires => "requires",
            Self::Obsoletes => "obsoletes",
            Self::Repoid => "repoid",
        }
    }
}

impl FromStr for PackageAttribute {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for PackageAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package list narrowers accepted by `GetPackages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageNarrow {
    /// Installed packages.
    Installed,
    /// Available, not installed packages.
    Available,
    /// Available updates for installed packages.
    Updates,
    /// Available packages obsoleting installed ones.
    Obsoletes,
    /// Recently added available packages.
    Recent,
    /// Installed packages not available from any repository.
    Extras,
}

impl FromStr for PackageNarrow {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installed" => Ok(Self::Installed),
            "available" => Ok(Self::Available),
            "updates" => Ok(Self::Updates),
            "obsoletes" => Ok(Self::Obsoletes),
            "recent" => Ok(Self::Recent),
            "extras" => Ok(Self::Extras),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_wire_shape() {
        let found = serde_json::to_value(Lookup::Found(42)).unwrap();
        assert_eq!(found, serde_json::json!({"status": "found", "value": 42}));

        let missing = serde_json::to_value(Lookup::<u32>::NotFound).unwrap();
        assert_eq!(missing, serde_json::json!({"status": "not_found"}));

        let unsupported = serde_json::to_value(Lookup::<u32>::Unsupported).unwrap();
        assert_eq!(unsupported, serde_json::json!({"status": "unsupported"}));
    }

    #[test]
    fn test_attribute_names_are_enumerated() {
        assert_eq!("summary".parse(), Ok(PackageAttribute::Summary));
        assert_eq!("repoid".parse(), Ok(PackageAttribute::Repoid));
        assert!("__class__".parse::<PackageAttribute>().is_err());
    }

    #[test]
    fn test_narrow_parsing() {
        assert_eq!("updates".parse(), Ok(PackageNarrow::Updates));
        assert!("everything".parse::<PackageNarrow>().is_err());
    }
}

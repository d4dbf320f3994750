//! Package identifiers.
//!
//! A [`PackageId`] is the stable external handle for any package reference.
//! On the wire it is the six fields `name,epoch,version,release,arch,origin`
//! joined with `,`. The origin is either a repository id or the sentinel
//! `installed`.
//!
//! # Invariants
//!
//! - No field contains `,`
//! - `name`, `version`, `release`, `arch` and the origin are non-empty
//! - `PackageId::from_str(s)?.to_string() == s` for every accepted `s`

mod format;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use format::{format_bytes, format_duration};

/// Origin sentinel for packages that come from the installed-package set.
pub const INSTALLED_ORIGIN: &str = "installed";

/// Number of `,`-separated fields in an encoded package id.
const FIELD_COUNT: usize = 6;

/// Errors produced when decoding or constructing a package id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageIdError {
    /// The encoded id does not have exactly six fields.
    #[error("package id must have {FIELD_COUNT} comma separated fields, got {found}: {input}")]
    FieldCount {
        /// Number of fields found.
        found: usize,
        /// The rejected input.
        input: String,
    },

    /// A required field is empty.
    #[error("package id field {field} must not be empty")]
    EmptyField {
        /// Name of the empty field.
        field: &'static str,
    },

    /// A field contains the field separator.
    #[error("package id field {field} must not contain ','")]
    SeparatorInField {
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Where a package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// The package is part of the installed-package set.
    Installed,
    /// The package comes from the named repository.
    ///
    /// Ids beginning with `@` name the repository an installed package was
    /// originally installed from.
    Repository(String),
}

impl Origin {
    /// Returns the wire form of the origin.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Installed => INSTALLED_ORIGIN,
            Self::Repository(id) => id,
        }
    }

    /// Returns `true` if the origin refers to the local package database.
    #[must_use]
    pub fn is_local(&self) -> bool {
        match self {
            Self::Installed => true,
            Self::Repository(id) => id.starts_with('@'),
        }
    }

    /// Returns the repository id, if the origin is a repository.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        match self {
            Self::Installed => None,
            Self::Repository(id) => Some(id),
        }
    }
}

impl From<&str> for Origin {
    fn from(value: &str) -> Self {
        if value == INSTALLED_ORIGIN {
            Self::Installed
        } else {
            Self::Repository(value.to_string())
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of a package: name, epoch, version, release, arch and
/// origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    /// Package name.
    pub name: String,
    /// Epoch, kept verbatim (usually `0`). May be empty.
    pub epoch: String,
    /// Upstream version.
    pub version: String,
    /// Release.
    pub release: String,
    /// Architecture.
    pub arch: String,
    /// Repository or installed origin.
    pub origin: Origin,
}

impl PackageId {
    /// Builds and validates a package id.
    pub fn new(
        name: impl Into<String>,
        epoch: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
        origin: Origin,
    ) -> Result<Self, PackageIdError> {
        let id = Self {
            name: name.into(),
            epoch: epoch.into(),
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
            origin,
        };
        id.validate()?;
        Ok(id)
    }

    /// Checks the field invariants.
    pub fn validate(&self) -> Result<(), PackageIdError> {
        let fields = [
            ("name", self.name.as_str(), true),
            ("epoch", self.epoch.as_str(), false),
            ("version", self.version.as_str(), true),
            ("release", self.release.as_str(), true),
            ("arch", self.arch.as_str(), true),
            ("origin", self.origin.as_str(), true),
        ];
        for (field, value, required) in fields {
            if required && value.is_empty() {
                return Err(PackageIdError::EmptyField { field });
            }
            if value.contains(',') {
                return Err(PackageIdError::SeparatorInField { field });
            }
        }
        Ok(())
    }

    /// Returns `true` when both ids name the same build (name, epoch, version,
    /// release, arch), regardless of origin.
    #[must_use]
    pub fn same_build(&self, other: &Self) -> bool {
        self.name == other.name
            && self.epoch == other.epoch
            && self.version == other.version
            && self.release == other.release
            && self.arch == other.arch
    }

    /// Human-readable `name-[epoch:]version-release.arch`.
    #[must_use]
    pub fn nevra(&self) -> String {
        if self.epoch.is_empty() || self.epoch == "0" {
            format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
        } else {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.name, self.epoch, self.version, self.release, self.arch, self.origin
        )
    }
}

impl FromStr for PackageId {
    type Err = PackageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        let [name, epoch, version, release, arch, origin] = fields.as_slice() else {
            return Err(PackageIdError::FieldCount {
                found: fields.len(),
                input: s.to_string(),
            });
        };
        Self::new(
            *name,
            *epoch,
            *version,
            *release,
            *arch,
            Origin::from(*origin),
        )
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_decode_repository_id() {
        let id: PackageId = "yumex,0,3.0.4,1.fc15,noarch,updates".parse().unwrap();
        assert_eq!(id.name, "yumex");
        assert_eq!(id.epoch, "0");
        assert_eq!(id.version, "3.0.4");
        assert_eq!(id.release, "1.fc15");
        assert_eq!(id.arch, "noarch");
        assert_eq!(id.origin, Origin::Repository("updates".to_string()));
        assert!(!id.origin.is_local());
    }

    #[test]
    fn test_decode_installed_sentinel() {
        let id: PackageId = "bash,0,4.2,1,x86_64,installed".parse().unwrap();
        assert_eq!(id.origin, Origin::Installed);
        assert!(id.origin.is_local());
        assert_eq!(id.to_string(), "bash,0,4.2,1,x86_64,installed");
    }

    #[test]
    fn test_installed_from_repo_is_local() {
        let id: PackageId = "bash,0,4.2,1,x86_64,@fedora".parse().unwrap();
        assert!(id.origin.is_local());
        assert_eq!(id.origin.repository(), Some("@fedora"));
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        let err = "bash,0,4.2,1,x86_64".parse::<PackageId>().unwrap_err();
        assert!(matches!(err, PackageIdError::FieldCount { found: 5, .. }));

        let err = "a,0,1,1,noarch,repo,extra".parse::<PackageId>().unwrap_err();
        assert!(matches!(err, PackageIdError::FieldCount { found: 7, .. }));
    }

    #[test]
    fn test_rejects_empty_required_field() {
        let err = ",0,1,1,noarch,repo".parse::<PackageId>().unwrap_err();
        assert_eq!(err, PackageIdError::EmptyField { field: "name" });
    }

    #[test]
    fn test_empty_epoch_is_allowed() {
        let id: PackageId = "foo,,1.0,1,noarch,base".parse().unwrap();
        assert_eq!(id.epoch, "");
        assert_eq!(id.to_string(), "foo,,1.0,1,noarch,base");
    }

    #[test]
    fn test_new_rejects_separator() {
        let err = PackageId::new("a,b", "0", "1", "1", "noarch", Origin::Installed).unwrap_err();
        assert_eq!(err, PackageIdError::SeparatorInField { field: "name" });
    }

    #[test]
    fn test_nevra_omits_zero_epoch() {
        let id: PackageId = "foo,0,1.0,2,x86_64,base".parse().unwrap();
        assert_eq!(id.nevra(), "foo-1.0-2.x86_64");
        let id: PackageId = "foo,3,1.0,2,x86_64,base".parse().unwrap();
        assert_eq!(id.nevra(), "foo-3:1.0-2.x86_64");
    }

    #[test]
    fn test_serde_uses_string_encoding() {
        let id: PackageId = "foo,0,1.0,2,x86_64,installed".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"foo,0,1.0,2,x86_64,installed\"");
        let back: PackageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    fn field(required: bool) -> impl Strategy<Value = String> {
        if required {
            "[A-Za-z0-9_.+@~-]{1,12}".boxed()
        } else {
            "[A-Za-z0-9_.+@~-]{0,12}".boxed()
        }
    }

    fn origin() -> impl Strategy<Value = String> {
        prop_oneof![Just(INSTALLED_ORIGIN.to_string()), field(true)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Property: decoding then encoding a well-formed id is lossless.
        #[test]
        fn prop_encoding_round_trips(
            name in field(true),
            epoch in field(false),
            version in field(true),
            release in field(true),
            arch in field(true),
            origin in origin(),
        ) {
            let encoded = format!("{name},{epoch},{version},{release},{arch},{origin}");
            let id: PackageId = encoded.parse().unwrap();
            prop_assert_eq!(id.to_string(), encoded);
        }
    }
}

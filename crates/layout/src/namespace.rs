//! Ownership namespaces for datapack storage.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Errors that can occur when parsing a namespace identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NamespaceError {
    /// The workshop suffix was not a positive integer
    #[error("Invalid workshop id: '{0}'")]
    InvalidWorkshopId(String),
    /// The identifier was neither a reserved name nor a UUID
    #[error("Invalid namespace: '{0}'")]
    Invalid(String),
}

/// A disjoint storage root owner.
///
/// The wire form is the owner identifier used by clients and stored in
/// metadata sidecars: a user's UUID, `official`, `workshop-<id>`, or `temp`.
/// Matching on the variant replaces string-prefix sniffing everywhere a
/// storage decision depends on ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// A registered user's private storage root, keyed by UUID
    User(Uuid),
    /// The fixed root for official datapacks
    Official,
    /// A workshop's storage root, keyed by workshop id
    Workshop(u32),
    /// Short-lived datapacks generated by chart tooling
    Temp,
}

impl Namespace {
    /// Parses a namespace from its wire form.
    ///
    /// # Errors
    ///
    /// Returns `NamespaceError` if the input is not `official`, `temp`,
    /// `workshop-<positive integer>`, or a UUID.
    pub fn parse(input: &str) -> Result<Self, NamespaceError> {
        match input {
            "official" => Ok(Self::Official),
            "temp" => Ok(Self::Temp),
            _ => {
                if let Some(id) = input.strip_prefix("workshop-") {
                    let id: u32 = id
                        .parse()
                        .map_err(|_| NamespaceError::InvalidWorkshopId(id.to_owned()))?;
                    if id == 0 {
                        return Err(NamespaceError::InvalidWorkshopId(id.to_string()));
                    }
                    return Ok(Self::Workshop(id));
                }
                Uuid::parse_str(input)
                    .map(Self::User)
                    .map_err(|_| NamespaceError::Invalid(input.to_owned()))
            }
        }
    }

    /// Creates the namespace for a workshop id.
    pub fn workshop(id: u32) -> Self {
        Self::Workshop(id)
    }

    /// Returns true for user namespaces, whose uploads are subject to the
    /// retention sweep.
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(uuid) => write!(f, "{}", uuid.hyphenated()),
            Self::Official => write!(f, "official"),
            Self::Workshop(id) => write!(f, "workshop-{id}"),
            Self::Temp => write!(f, "temp"),
        }
    }
}

impl FromStr for Namespace {
    type Err = NamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Namespace::parse(&s).map_err(serde::de::Error::custom)
    }
}

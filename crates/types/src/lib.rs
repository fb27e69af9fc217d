//! Validated domain primitives shared across the geochart workspace.

/// Maximum number of characters allowed in a datapack title.
pub const MAX_TITLE_LENGTH: usize = 100;

/// Directory names reserved by the storage layout. A datapack titled after
/// one of these would collide with an internal directory of its namespace.
pub const RESERVED_TITLES: [&str; 2] = ["encrypted", "files"];

/// Errors that can occur when creating a validated datapack title.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TitleError {
    /// The input was empty
    #[error("Title cannot be empty")]
    Empty,
    /// The input had leading or trailing whitespace
    #[error("Title cannot have surrounding whitespace")]
    Untrimmed,
    /// The input exceeded [`MAX_TITLE_LENGTH`]
    #[error("Max title length is {MAX_TITLE_LENGTH}")]
    TooLong,
    /// The input contained a path separator, `..`, a leading dot, or a
    /// control character
    #[error("Title contains unsafe path characters")]
    UnsafePath,
    /// The input matched a reserved directory name
    #[error("Title \"{0}\" is reserved")]
    Reserved(String),
}

/// A datapack title that is safe to use as a single directory name.
///
/// Every filesystem path derived from a title goes through this type, so
/// the containment checks downstream never see separators, `..` components,
/// or names that collide with the layout's internal directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatapackTitle(String);

impl DatapackTitle {
    /// Creates a new `DatapackTitle` from the given input.
    ///
    /// The input must already be trimmed; titles are a user-facing key and
    /// two titles differing only in surrounding whitespace would map to
    /// distinct directories while looking identical.
    ///
    /// # Errors
    ///
    /// Returns `TitleError` if the input is empty, untrimmed, too long,
    /// contains path separators / `..` / control characters / a leading
    /// dot, or matches a reserved directory name.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TitleError> {
        let title = input.as_ref();
        if title.is_empty() {
            return Err(TitleError::Empty);
        }
        if title.trim() != title {
            return Err(TitleError::Untrimmed);
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(TitleError::TooLong);
        }
        if title.contains('/')
            || title.contains('\\')
            || title.contains("..")
            || title.starts_with('.')
            || title.chars().any(char::is_control)
        {
            return Err(TitleError::UnsafePath);
        }
        if RESERVED_TITLES.contains(&title) {
            return Err(TitleError::Reserved(title.to_owned()));
        }
        Ok(Self(title.to_owned()))
    }

    /// Returns the inner title as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatapackTitle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DatapackTitle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for DatapackTitle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for DatapackTitle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DatapackTitle::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Formats a byte count as the human-readable size string stored in
/// datapack metadata (e.g. `512B`, `30MB`).
///
/// Sizes are rounded to one decimal place, with a trailing `.0` dropped.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        let rounded = (size * 10.0).round() / 10.0;
        if rounded.fract() == 0.0 {
            format!("{}{}", rounded as u64, UNITS[unit])
        } else {
            format!("{:.1}{}", rounded, UNITS[unit])
        }
    }
}

//! Repository names, tags, and tag-or-digest references.

use std::fmt;
use std::str::FromStr;

use crate::digest::Digest;

/// Longest allowed repository name, in bytes.
pub const REPOSITORY_NAME_MAX_LENGTH: usize = 255;

/// Longest allowed tag, in bytes.
pub const TAG_MAX_LENGTH: usize = 128;

/// Why a name or tag was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Empty repository name.
    #[error("repository name must not be empty")]
    Empty,

    /// Repository name longer than [`REPOSITORY_NAME_MAX_LENGTH`].
    #[error("repository name must not be more than {REPOSITORY_NAME_MAX_LENGTH} characters")]
    TooLong,

    /// A path component broke the component grammar.
    #[error("repository name component {0:?} must match [a-z0-9]+(?:[._-][a-z0-9]+)*")]
    InvalidComponent(String),

    /// Tag broke the tag grammar.
    #[error("tag {0:?} must match [\\w][\\w.-]{{0,127}}")]
    InvalidTag(String),
}

/// A validated repository name such as `library/ubuntu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryName(String);

impl RepositoryName {
    /// Validate a repository name.
    pub fn parse(name: &str) -> Result<Self, NameError> {
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > REPOSITORY_NAME_MAX_LENGTH {
            return Err(NameError::TooLong);
        }
        for component in name.split('/') {
            if !valid_component(component) {
                return Err(NameError::InvalidComponent(component.to_string()));
            }
        }
        Ok(Self(name.to_string()))
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RepositoryName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn alphanumeric(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

// [a-z0-9]+(?:[._-][a-z0-9]+)*
fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !alphanumeric(first) || !alphanumeric(last) {
        return false;
    }

    let mut previous_separator = false;
    for &b in bytes {
        match b {
            b'.' | b'_' | b'-' if previous_separator => return false,
            b'.' | b'_' | b'-' => previous_separator = true,
            b if alphanumeric(b) => previous_separator = false,
            _ => return false,
        }
    }
    true
}

/// Validate a tag against `[\w][\w.-]{0,127}`.
pub fn validate_tag(tag: &str) -> Result<(), NameError> {
    let word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let bytes = tag.as_bytes();
    let valid = match bytes.split_first() {
        Some((&first, rest)) => {
            bytes.len() <= TAG_MAX_LENGTH
                && word(first)
                && rest.iter().all(|&b| word(b) || b == b'.' || b == b'-')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(NameError::InvalidTag(tag.to_string()))
    }
}

/// The last path segment of a manifest URL: either a tag or a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A mutable tag.
    Tag(String),
    /// An immutable revision digest.
    Digest(Digest),
}

impl FromStr for Reference {
    type Err = NameError;

    /// Anything containing `:` must be a digest; tags cannot contain one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            return s
                .parse()
                .map(Reference::Digest)
                .map_err(|_| NameError::InvalidTag(s.to_string()));
        }
        validate_tag(s)?;
        Ok(Reference::Tag(s.to_string()))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => f.write_str(tag),
            Reference::Digest(digest) => write!(f, "{digest}"),
        }
    }
}

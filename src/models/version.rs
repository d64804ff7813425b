use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("Invalid version '{0}': {1}")]
    InvalidVersion(String, String),
    #[error("Invalid version range '{0}': {1}")]
    InvalidRange(String, String),
}

/// A `major.minor.micro.qualifier` version.
///
/// Ordering compares the numeric components first and the qualifier
/// lexicographically last, so `1.0.0` < `1.0.0.beta` < `1.0.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub qualifier: String,
}

impl Version {
    pub const EMPTY: Version = Version {
        major: 0,
        minor: 0,
        micro: 0,
        qualifier: String::new(),
    };

    pub fn new(major: u64, minor: u64, micro: u64) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::EMPTY);
        }

        let invalid = |reason: &str| VersionError::InvalidVersion(text.to_string(), reason.to_string());
        let mut parts = trimmed.splitn(4, '.');
        let mut numbers = [0u64; 3];
        for (slot, number) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(invalid(&format!("component {} is not numeric", slot + 1)));
                    }
                    *number = part.parse().map_err(|_| invalid("component out of range"))?;
                }
                None => break,
            }
        }

        let qualifier = parts.next().unwrap_or_default();
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("qualifier contains invalid characters"));
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier: qualifier.to_string(),
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Version::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// An interval of versions.
///
/// A bare version `1.2` denotes `[1.2, ∞)`. Bracketed forms follow interval
/// notation, with `[min,max)` the usual shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub left: Version,
    pub left_closed: bool,
    pub right: Option<Version>,
    pub right_closed: bool,
}

impl VersionRange {
    pub fn at_least(version: Version) -> Self {
        Self {
            left: version,
            left_closed: true,
            right: None,
            right_closed: false,
        }
    }

    /// `[left, right)`
    pub fn half_open(left: Version, right: Version) -> Self {
        Self {
            left,
            left_closed: true,
            right: Some(right),
            right_closed: false,
        }
    }

    pub fn exactly(version: Version) -> Self {
        Self {
            left: version.clone(),
            left_closed: true,
            right: Some(version),
            right_closed: true,
        }
    }

    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let trimmed = text.trim();
        let invalid =
            |reason: &str| VersionError::InvalidRange(text.to_string(), reason.to_string());

        let left_closed = match trimmed.chars().next() {
            Some('[') => true,
            Some('(') => false,
            Some(_) => return Ok(Self::at_least(Version::parse(trimmed)?)),
            None => return Err(invalid("empty range")),
        };
        let right_closed = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid("missing closing bracket")),
        };
        if trimmed.len() < 2 {
            return Err(invalid("missing closing bracket"));
        }

        let body = &trimmed[1..trimmed.len() - 1];
        let (left, right) = body
            .split_once(',')
            .ok_or_else(|| invalid("expected two comma separated versions"))?;
        let left = Version::parse(left)?;
        let right = Version::parse(right)?;
        if right < left {
            return Err(invalid("right endpoint is lower than left endpoint"));
        }

        Ok(Self {
            left,
            left_closed,
            right: Some(right),
            right_closed,
        })
    }

    pub fn includes(&self, version: &Version) -> bool {
        let above_left = if self.left_closed {
            version >= &self.left
        } else {
            version > &self.left
        };
        let below_right = match &self.right {
            None => true,
            Some(right) if self.right_closed => version <= right,
            Some(right) => version < right,
        };
        above_left && below_right
    }

    pub fn is_empty(&self) -> bool {
        match &self.right {
            None => false,
            Some(right) => match right.cmp(&self.left) {
                Ordering::Less => true,
                Ordering::Equal => !(self.left_closed && self.right_closed),
                Ordering::Greater => false,
            },
        }
    }

    /// Renders an equivalent filter over `attribute`.
    pub fn to_filter(&self, attribute: &str) -> String {
        let left = if self.left_closed {
            format!("({}>={})", attribute, self.left)
        } else {
            format!("(!({}<={}))", attribute, self.left)
        };
        match &self.right {
            None => left,
            Some(right) if self.right_closed => {
                format!("(&{}({}<={}))", left, attribute, right)
            }
            Some(right) => format!("(&{}(!({}>={})))", left, attribute, right),
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.right {
            None => write!(f, "{}", self.left),
            Some(right) => write!(
                f,
                "{}{},{}{}",
                if self.left_closed { '[' } else { '(' },
                self.left,
                right,
                if self.right_closed { ']' } else { ')' }
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        VersionRange::parse(&text).map_err(serde::de::Error::custom)
    }
}

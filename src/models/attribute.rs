use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::version::{Version, VersionError, VersionRange};

const VERSION_PREFIX: &str = "version:";
const VERSIONS_PREFIX: &str = "versions:";
const RANGES_PREFIX: &str = "ranges:";

/// A typed capability attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    String(String),
    Long(i64),
    Version(Version),
    Versions(Vec<Version>),
    VersionRanges(Vec<VersionRange>),
    Strings(Vec<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<&Version> {
        match self {
            AttributeValue::Version(v) => Some(v),
            _ => None,
        }
    }

    /// Parses the prefixed text form used in descriptors.
    pub fn parse_typed(text: &str) -> Result<Self, VersionError> {
        if let Some(rest) = text.strip_prefix(VERSION_PREFIX) {
            return Ok(AttributeValue::Version(Version::parse(rest)?));
        }
        if let Some(rest) = text.strip_prefix(VERSIONS_PREFIX) {
            let versions = rest
                .split(',')
                .filter(|v| !v.trim().is_empty())
                .map(Version::parse)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(AttributeValue::Versions(versions));
        }
        if let Some(rest) = text.strip_prefix(RANGES_PREFIX) {
            let ranges = rest
                .split(';')
                .filter(|r| !r.trim().is_empty())
                .map(VersionRange::parse)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(AttributeValue::VersionRanges(ranges));
        }
        Ok(AttributeValue::String(text.to_string()))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<Version> for AttributeValue {
    fn from(value: Version) -> Self {
        AttributeValue::Version(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Long(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::Strings(value)
    }
}

fn join<T: fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Long(n) => write!(f, "{}", n),
            AttributeValue::Version(v) => write!(f, "{}", v),
            AttributeValue::Versions(vs) => f.write_str(&join(vs, ",")),
            AttributeValue::VersionRanges(rs) => f.write_str(&join(rs, ";")),
            AttributeValue::Strings(ss) => f.write_str(&ss.join(",")),
        }
    }
}

// Descriptors carry typed values as prefixed strings, e.g. `version:1.2.0`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawAttribute {
    Long(i64),
    Text(String),
    List(Vec<String>),
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = match self {
            AttributeValue::String(s) => RawAttribute::Text(s.clone()),
            AttributeValue::Long(n) => RawAttribute::Long(*n),
            AttributeValue::Version(v) => RawAttribute::Text(format!("{}{}", VERSION_PREFIX, v)),
            AttributeValue::Versions(vs) => {
                RawAttribute::Text(format!("{}{}", VERSIONS_PREFIX, join(vs, ",")))
            }
            AttributeValue::VersionRanges(rs) => {
                RawAttribute::Text(format!("{}{}", RANGES_PREFIX, join(rs, ";")))
            }
            AttributeValue::Strings(ss) => RawAttribute::List(ss.clone()),
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawAttribute::deserialize(deserializer)? {
            RawAttribute::Long(n) => Ok(AttributeValue::Long(n)),
            RawAttribute::List(items) => Ok(AttributeValue::Strings(items)),
            RawAttribute::Text(text) => {
                AttributeValue::parse_typed(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_prefixes() {
        assert_eq!(
            AttributeValue::parse_typed("version:1.2").unwrap(),
            AttributeValue::Version(Version::new(1, 2, 0))
        );
        assert_eq!(
            AttributeValue::parse_typed("versions:1.8,11").unwrap(),
            AttributeValue::Versions(vec![Version::new(1, 8, 0), Version::new(11, 0, 0)])
        );
        assert_eq!(
            AttributeValue::parse_typed("plain").unwrap(),
            AttributeValue::String("plain".to_string())
        );
        assert!(AttributeValue::parse_typed("version:one").is_err());
    }

    #[test]
    fn test_yaml_values() {
        let values: Vec<AttributeValue> =
            serde_yaml::from_str("- 42\n- version:2.0\n- [a, b]\n- text").unwrap();
        assert_eq!(
            values,
            vec![
                AttributeValue::Long(42),
                AttributeValue::Version(Version::new(2, 0, 0)),
                AttributeValue::Strings(vec!["a".to_string(), "b".to_string()]),
                AttributeValue::String("text".to_string()),
            ]
        );
    }
}

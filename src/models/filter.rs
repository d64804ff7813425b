//! LDAP-style match filters over capability attributes.
//!
//! The grammar is the usual module-container subset of RFC 1960:
//!
//! ```text
//! filter     = "(" ( "&" filter+ | "|" filter+ | "!" filter | item ) ")"
//! item       = attr ( "=" | "~=" | ">=" | "<=" ) value
//! ```
//!
//! An `=` value with unescaped `*` is a substring match, a lone `*` is a
//! presence test.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;

use super::attribute::AttributeValue;
use super::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("Malformed filter '{filter}' at offset {position}: {reason}")]
    Malformed {
        filter: String,
        position: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::Approx => "~=",
            Comparison::GreaterEq => ">=",
            Comparison::LessEq => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        attribute: String,
        op: Comparison,
        value: String,
    },
    Present(String),
    /// `initial*any*...*final`; an empty `initial`/`last` means the value starts/ends with `*`.
    Substring {
        attribute: String,
        initial: String,
        any: Vec<String>,
        last: String,
    },
}

impl Filter {
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            source: text,
            chars: text.char_indices().collect(),
            pos: 0,
        };
        parser.skip_whitespace();
        let filter = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(filter)
    }

    pub fn equal(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Compare {
            attribute: attribute.into(),
            op: Comparison::Equal,
            value: value.into(),
        }
    }

    /// Conjunction that flattens nested `&` operands.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut operands = Vec::new();
        for filter in filters {
            match filter {
                Filter::And(inner) => operands.extend(inner),
                other => operands.push(other),
            }
        }
        if operands.len() == 1 {
            operands.remove(0)
        } else {
            Filter::And(operands)
        }
    }

    pub fn matches(
        &self,
        attributes: &IndexMap<String, AttributeValue>,
        case_insensitive_strings: bool,
    ) -> bool {
        match self {
            Filter::And(filters) => filters
                .iter()
                .all(|f| f.matches(attributes, case_insensitive_strings)),
            Filter::Or(filters) => filters
                .iter()
                .any(|f| f.matches(attributes, case_insensitive_strings)),
            Filter::Not(filter) => !filter.matches(attributes, case_insensitive_strings),
            Filter::Present(attribute) => lookup(attributes, attribute).is_some(),
            Filter::Compare {
                attribute,
                op,
                value,
            } => lookup(attributes, attribute)
                .map(|actual| compare(actual, *op, value, case_insensitive_strings))
                .unwrap_or(false),
            Filter::Substring {
                attribute,
                initial,
                any,
                last,
            } => match lookup(attributes, attribute) {
                Some(AttributeValue::String(s)) => {
                    substring_match(s, initial, any, last, case_insensitive_strings)
                }
                Some(AttributeValue::Strings(items)) => items
                    .iter()
                    .any(|s| substring_match(s, initial, any, last, case_insensitive_strings)),
                _ => false,
            },
        }
    }

    /// Every attribute name the filter mentions.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                filters.iter().for_each(|f| f.collect_names(names))
            }
            Filter::Not(filter) => filter.collect_names(names),
            Filter::Present(attribute)
            | Filter::Compare { attribute, .. }
            | Filter::Substring { attribute, .. } => {
                if !names.iter().any(|n| n.eq_ignore_ascii_case(attribute)) {
                    names.push(attribute);
                }
            }
        }
    }

    /// The value an `=` term pins `attribute` to, looking through a top-level `&`.
    pub fn pinned_value(&self, attribute: &str) -> Option<&str> {
        match self {
            Filter::Compare {
                attribute: name,
                op: Comparison::Equal,
                value,
            } if name.eq_ignore_ascii_case(attribute) => Some(value),
            Filter::And(filters) => filters.iter().find_map(|f| f.pinned_value(attribute)),
            _ => None,
        }
    }
}

fn lookup<'a>(
    attributes: &'a IndexMap<String, AttributeValue>,
    name: &str,
) -> Option<&'a AttributeValue> {
    attributes.get(name).or_else(|| {
        attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn normalize_approx(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn ordering_satisfies(ordering: Ordering, op: Comparison) -> bool {
    match op {
        Comparison::Equal | Comparison::Approx => ordering == Ordering::Equal,
        Comparison::GreaterEq => ordering != Ordering::Less,
        Comparison::LessEq => ordering != Ordering::Greater,
    }
}

fn compare_strings(actual: &str, op: Comparison, operand: &str, case_insensitive: bool) -> bool {
    match op {
        Comparison::Approx => normalize_approx(actual) == normalize_approx(operand),
        _ if case_insensitive => ordering_satisfies(
            actual.to_lowercase().cmp(&operand.to_lowercase()),
            op,
        ),
        _ => ordering_satisfies(actual.cmp(operand), op),
    }
}

fn compare(actual: &AttributeValue, op: Comparison, operand: &str, case_insensitive: bool) -> bool {
    match actual {
        AttributeValue::String(s) => compare_strings(s, op, operand, case_insensitive),
        AttributeValue::Strings(items) => items
            .iter()
            .any(|s| compare_strings(s, op, operand, case_insensitive)),
        AttributeValue::Long(n) => operand
            .trim()
            .parse::<i64>()
            .map(|other| ordering_satisfies(n.cmp(&other), op))
            .unwrap_or(false),
        AttributeValue::Version(v) => Version::parse(operand)
            .map(|other| ordering_satisfies(v.cmp(&other), op))
            .unwrap_or(false),
        AttributeValue::Versions(versions) => Version::parse(operand)
            .map(|other| {
                versions
                    .iter()
                    .any(|v| ordering_satisfies(v.cmp(&other), op))
            })
            .unwrap_or(false),
        AttributeValue::VersionRanges(ranges) => {
            let Ok(other) = Version::parse(operand) else {
                return false;
            };
            ranges.iter().any(|range| match op {
                Comparison::Equal | Comparison::Approx => range.includes(&other),
                Comparison::GreaterEq => range.right.as_ref().map_or(true, |r| *r >= other),
                Comparison::LessEq => range.left <= other,
            })
        }
    }
}

fn substring_match(
    value: &str,
    initial: &str,
    any: &[String],
    last: &str,
    case_insensitive: bool,
) -> bool {
    let fold = |s: &str| {
        if case_insensitive {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    };
    let value = fold(value);
    let Some(mut rest) = value.strip_prefix(fold(initial).as_str()) else {
        return false;
    };
    for part in any {
        let part = fold(part);
        match rest.find(part.as_str()) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(fold(last).as_str())
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) => {
                f.write_str("(&")?;
                filters.iter().try_for_each(|filter| write!(f, "{}", filter))?;
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                filters.iter().try_for_each(|filter| write!(f, "{}", filter))?;
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{})", filter),
            Filter::Present(attribute) => write!(f, "({}=*)", attribute),
            Filter::Compare {
                attribute,
                op,
                value,
            } => write!(f, "({}{}{})", attribute, op.symbol(), escape(value)),
            Filter::Substring {
                attribute,
                initial,
                any,
                last,
            } => {
                write!(f, "({}={}*", attribute, escape(initial))?;
                for part in any {
                    write!(f, "{}*", escape(part))?;
                }
                write!(f, "{})", escape(last))
            }
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

enum ValuePiece {
    Text(String),
    Star,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> FilterError {
        let position = self
            .chars
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.source.len());
        FilterError::Malformed {
            filter: self.source.to_string(),
            position,
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(&format!("expected '{}'", expected))),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_operands()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_operands()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_whitespace();
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_operands(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut operands = Vec::new();
        self.skip_whitespace();
        while self.peek() == Some('(') {
            operands.push(self.parse_filter()?);
            self.skip_whitespace();
        }
        if operands.is_empty() {
            return Err(self.error("composite filter needs at least one operand"));
        }
        Ok(operands)
    }

    fn parse_item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attribute: String = self.chars[start..self.pos]
            .iter()
            .map(|(_, c)| *c)
            .collect::<String>()
            .trim()
            .to_string();
        if attribute.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                Comparison::Equal
            }
            Some(c @ ('~' | '<' | '>')) => {
                self.pos += 1;
                self.expect('=')?;
                match c {
                    '~' => Comparison::Approx,
                    '<' => Comparison::LessEq,
                    _ => Comparison::GreaterEq,
                }
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let pieces = self.parse_value()?;
        let has_star = pieces.iter().any(|p| matches!(p, ValuePiece::Star));
        if !has_star {
            let value = pieces
                .into_iter()
                .map(|p| match p {
                    ValuePiece::Text(t) => t,
                    ValuePiece::Star => String::new(),
                })
                .collect();
            return Ok(Filter::Compare {
                attribute,
                op,
                value,
            });
        }
        if op != Comparison::Equal {
            return Err(self.error("wildcards are only allowed with '='"));
        }
        if pieces.len() == 1 {
            return Ok(Filter::Present(attribute));
        }

        // Split on stars: text before the first star is `initial`, after the last is `last`.
        let mut segments = vec![String::new()];
        for piece in pieces {
            match piece {
                ValuePiece::Text(t) => {
                    if let Some(current) = segments.last_mut() {
                        current.push_str(&t);
                    }
                }
                ValuePiece::Star => segments.push(String::new()),
            }
        }
        let initial = segments.remove(0);
        let last = segments.pop().unwrap_or_default();
        let any = segments.into_iter().filter(|s| !s.is_empty()).collect();
        Ok(Filter::Substring {
            attribute,
            initial,
            any,
            last,
        })
    }

    fn parse_value(&mut self) -> Result<Vec<ValuePiece>, FilterError> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            text.push(c);
                            self.pos += 1;
                        }
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some('*') => {
                    if !text.is_empty() {
                        pieces.push(ValuePiece::Text(std::mem::take(&mut text)));
                    }
                    pieces.push(ValuePiece::Star);
                    self.pos += 1;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        if !text.is_empty() {
            pieces.push(ValuePiece::Text(text));
        }
        Ok(pieces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttributeValue)]) -> IndexMap<String, AttributeValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_and_render() {
        let text = "(&(osgi.wiring.package=org.acme)(version>=1.0.0)(!(version>=2.0.0)))";
        let filter = Filter::parse(text).unwrap();
        assert_eq!(filter.to_string(), text);
        assert_eq!(filter.pinned_value("osgi.wiring.package"), Some("org.acme"));
    }

    #[test]
    fn test_version_comparison_is_typed() {
        let filter = Filter::parse("(&(version>=1.10)(version<=2))").unwrap();
        let caps = attrs(&[("version", AttributeValue::Version(Version::new(1, 10, 0)))]);
        assert!(filter.matches(&caps, false));
        // String comparison would put "1.9" above "1.10".
        let caps = attrs(&[("version", AttributeValue::Version(Version::new(1, 9, 0)))]);
        assert!(!filter.matches(&caps, false));
    }

    #[test]
    fn test_substring_and_presence() {
        let filter = Filter::parse("(osgi.wiring.package=com.acme.*)").unwrap();
        assert!(matches!(filter, Filter::Substring { .. }));
        let caps = attrs(&[("osgi.wiring.package", "com.acme.util".into())]);
        assert!(filter.matches(&caps, false));
        let caps = attrs(&[("osgi.wiring.package", "com.other".into())]);
        assert!(!filter.matches(&caps, false));

        let any = Filter::parse("(osgi.wiring.package=*)").unwrap();
        assert_eq!(any, Filter::Present("osgi.wiring.package".to_string()));
        assert!(any.matches(&caps, false));
    }

    #[test]
    fn test_list_attributes_match_any_element() {
        let filter = Filter::parse("(osgi.native.osname=linux)").unwrap();
        let caps = attrs(&[(
            "osgi.native.osname",
            AttributeValue::Strings(vec!["Linux".to_string(), "GNU/Linux".to_string()]),
        )]);
        assert!(!filter.matches(&caps, false));
        assert!(filter.matches(&caps, true));
    }

    #[test]
    fn test_escaped_characters() {
        let filter = Filter::parse(r"(name=a\(b\)\*)").unwrap();
        let caps = attrs(&[("name", "a(b)*".into())]);
        assert!(filter.matches(&caps, false));
        assert_eq!(filter.to_string(), r"(name=a\(b\)\*)");
    }

    #[test]
    fn test_malformed_filters() {
        for text in ["", "(", "(a=b", "(&)", "(=b)", "(a>b)", "(a=b))", "(a>=b*)"] {
            assert!(Filter::parse(text).is_err(), "{} should not parse", text);
        }
    }

    #[test]
    fn test_attribute_lookup_ignores_case() {
        let filter = Filter::parse("(Bundle-Version>=1.0)").unwrap();
        let caps = attrs(&[("bundle-version", AttributeValue::Version(Version::new(1, 0, 0)))]);
        assert!(filter.matches(&caps, false));
    }
}

//! Hierarchical bus addresses.
//!
//! Every node is reachable under a path rooted at the machine and application:
//! `corabus://{machine}/{application}/{hub}/.../{node}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{Error, Result};

/// URI scheme of bus addresses.
pub const SCHEME: &str = "corabus";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusPath {
    segments: Vec<String>,
}

impl BusPath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for segment in segments {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    /// Append one segment. Segments are non-empty and contain no `/`.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self> {
        let segment = segment.into();
        validate_segment(&segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn starts_with(&self, prefix: &BusPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Segments of `self` below `prefix`, if `prefix` is an ancestor.
    pub fn strip_prefix(&self, prefix: &BusPath) -> Option<&[String]> {
        if self.starts_with(prefix) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }

    pub fn to_uri(&self) -> String {
        format!("{}://{}", SCHEME, self.segments.join("/"))
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::validation("bus path segment cannot be empty"));
    }
    if segment.contains('/') {
        return Err(Error::validation(format!(
            "bus path segment cannot contain '/': {}",
            segment
        )));
    }
    Ok(())
}

impl fmt::Display for BusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for BusPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let prefix = format!("{}://", SCHEME);
        let rest = s
            .strip_prefix(&prefix)
            .ok_or_else(|| Error::validation(format!("not a {} uri: {}", SCHEME, s)))?;
        if rest.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(rest.split('/'))
    }
}

impl TryFrom<String> for BusPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BusPath> for String {
    fn from(path: BusPath) -> Self {
        path.to_uri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_round_trip() {
        let path = BusPath::from_segments(["host", "app", "hub", "node"]).unwrap();
        assert_eq!(path.to_uri(), "corabus://host/app/hub/node");
        let parsed: BusPath = "corabus://host/app/hub/node".parse().unwrap();
        assert_eq!(parsed, path);
        assert_eq!(parsed.name(), Some("node"));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!("http://x/y".parse::<BusPath>().is_err());
        assert!("corabus://a//b".parse::<BusPath>().is_err());
        assert!(BusPath::root().child("a/b").is_err());
    }

    #[test]
    fn test_prefix_navigation() {
        let base = BusPath::from_segments(["m", "a"]).unwrap();
        let leaf = base.child("hub").unwrap().child("leaf").unwrap();
        assert!(leaf.starts_with(&base));
        assert_eq!(
            leaf.strip_prefix(&base).unwrap(),
            &["hub".to_string(), "leaf".to_string()]
        );
        assert_eq!(leaf.parent().unwrap().name(), Some("hub"));
        assert!(BusPath::root().parent().is_none());
    }

    #[test]
    fn test_serde_as_uri_string() {
        let path = BusPath::from_segments(["m", "a"]).unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"corabus://m/a\"");
        let back: BusPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}

use std::fmt;
use std::str::FromStr;

/// Namespace/name identity of one object, the unit of work-queue dedup.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unexpected key format: {0:?}")]
    InvalidFormat(String),
    #[error("empty name in key {0:?}")]
    EmptyName(String),
}

impl ResourceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Split a `namespace/name` (or bare `name`) encoding.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let mut parts = raw.split('/');
        let key = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => Self::new("", name),
            (Some(ns), Some(name), None) => Self::new(ns, name),
            _ => return Err(KeyError::InvalidFormat(raw.to_string())),
        };
        if key.name.is_empty() {
            return Err(KeyError::EmptyName(raw.to_string()));
        }
        Ok(key)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_and_cluster_keys() {
        assert_eq!(
            ResourceKey::parse("ns/p1").unwrap(),
            ResourceKey::new("ns", "p1")
        );
        assert_eq!(
            ResourceKey::parse("p1").unwrap(),
            ResourceKey::new("", "p1")
        );
        assert_eq!(ResourceKey::new("ns", "p1").to_string(), "ns/p1");
        assert_eq!(ResourceKey::new("", "p1").to_string(), "p1");
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(matches!(
            ResourceKey::parse("a/b/c"),
            Err(KeyError::InvalidFormat(_))
        ));
        assert!(matches!(
            ResourceKey::parse("ns/"),
            Err(KeyError::EmptyName(_))
        ));
        assert!(matches!(ResourceKey::parse(""), Err(KeyError::EmptyName(_))));
    }
}

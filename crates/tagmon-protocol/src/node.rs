use serde::{Deserialize, Serialize};

/// Address-space-local part of a node identifier. A purely numeric raw
/// identifier is an integer-typed address; everything else is a string
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeAddress {
    Numeric(u32),
    Symbolic(String),
}

impl NodeAddress {
    /// Parses the local form: `i=1057`, `s=Motor.Speed`, or a bare
    /// identifier (numeric → integer address, otherwise symbolic).
    pub fn parse_local(raw: &str) -> Self {
        if let Some(num) = raw.strip_prefix("i=") {
            if let Ok(n) = num.parse::<u32>() {
                return NodeAddress::Numeric(n);
            }
        }
        if let Some(s) = raw.strip_prefix("s=") {
            return NodeAddress::Symbolic(s.to_string());
        }
        match raw.parse::<u32>() {
            Ok(n) => NodeAddress::Numeric(n),
            Err(_) => NodeAddress::Symbolic(raw.to_string()),
        }
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeAddress::Numeric(n) => write!(f, "i={n}"),
            NodeAddress::Symbolic(s) => write!(f, "s={s}"),
        }
    }
}

/// Namespace-qualified node identifier, e.g. `ns=2;i=1057`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub namespace: u16,
    pub address: NodeAddress,
}

impl NodeId {
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            address: NodeAddress::Numeric(id),
        }
    }

    pub fn symbolic(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            address: NodeAddress::Symbolic(name.into()),
        }
    }

    /// Builds a node identifier from a configured raw tag. Accepts the
    /// fully qualified form (`ns=2;i=1057`), or a bare local identifier
    /// which is qualified with `default_namespace`.
    pub fn from_raw(raw: &str, default_namespace: u16) -> Self {
        match Self::parse(raw) {
            Some(node) => node,
            None => Self {
                namespace: default_namespace,
                address: NodeAddress::parse_local(raw),
            },
        }
    }

    /// Parses the fully qualified `ns=<n>;<local>` form, or `None` when the
    /// namespace prefix is missing or malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix("ns=")?;
        let (ns, local) = rest.split_once(';')?;
        let namespace = ns.parse::<u16>().ok()?;
        Some(Self {
            namespace,
            address: NodeAddress::parse_local(local),
        })
    }
}

// The wire form doubles as the key of persisted value maps.
impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ns={};{}", self.namespace, self.address)
    }
}

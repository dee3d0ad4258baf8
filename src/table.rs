//! Static hostname → backend address routing table.
//!
//! `Table::lookup` performs first-match, case-insensitive exact-pattern
//! lookup, deterministic given the configured entry order.

use crate::address::Address;
use crate::config::{BackendEntry, TableConfig};

#[derive(Debug, Clone)]
pub struct Backend {
    pub pattern: String,
    pub address: Address,
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub name: Option<String>,
    backends: Vec<Backend>,
}

impl Table {
    pub fn from_config(config: &TableConfig) -> Self {
        Self {
            name: config.name.clone(),
            backends: config
                .entries
                .iter()
                .map(|BackendEntry { pattern, address }| Backend {
                    pattern: pattern.clone(),
                    address: address.clone(),
                })
                .collect(),
        }
    }

    /// First entry whose pattern case-insensitively equals `hostname`.
    pub fn lookup(&self, hostname: &str) -> Option<&Address> {
        self.backends
            .iter()
            .find(|b| b.pattern.eq_ignore_ascii_case(hostname))
            .map(|b| &b.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> Table {
        Table {
            name: None,
            backends: entries
                .iter()
                .map(|(pattern, addr)| Backend {
                    pattern: pattern.to_string(),
                    address: Address::parse(addr, Some(443)).unwrap(),
                })
                .collect(),
        }
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let t = table(&[("Example.com", "10.0.0.1")]);
        assert!(t.lookup("example.COM").is_some());
    }

    #[test]
    fn first_match_wins() {
        let t = table(&[("a.test", "10.0.0.1"), ("a.test", "10.0.0.2")]);
        let addr = t.lookup("a.test").unwrap();
        assert_eq!(addr, &Address::parse("10.0.0.1", Some(443)).unwrap());
    }

    #[test]
    fn no_match_returns_none() {
        let t = table(&[("a.test", "10.0.0.1")]);
        assert!(t.lookup("b.test").is_none());
    }
}

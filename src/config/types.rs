use crate::address::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tls,
    Http,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tls
    }
}

#[derive(Debug, Clone)]
pub struct BackendEntry {
    pub pattern: String,
    pub address: Address,
}

#[derive(Debug, Clone, Default)]
pub struct TableConfig {
    /// `None` for the anonymous/default table.
    pub name: Option<String>,
    pub entries: Vec<BackendEntry>,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub address: Address,
    pub protocol: Protocol,
    /// Name of the `table` stanza this listener routes through.
    pub table: Option<String>,
    pub fallback: Option<Address>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub username: Option<String>,
    pub listeners: Vec<ListenerConfig>,
    pub tables: Vec<TableConfig>,
}

impl Config {
    pub fn table_named(&self, name: Option<&str>) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name.as_deref() == name)
    }
}

//! Pretty-printed config dashboard: an ANSI-colored summary printed once at
//! startup, or via `proxyd -t`.

use crate::config::types::{Config, Protocol};

pub fn print_config(config: &Config) {
    println!("\n\x1b[1;35m sni-table-proxy CONFIGURATION\x1b[0m");
    println!("\x1b[38;5;240m ══════════════════════════════════════════\x1b[0m");

    if let Some(user) = &config.username {
        println!("  \x1b[1;34m⦿\x1b[0m \x1b[1;37mRun as:\x1b[0m \x1b[32m{}\x1b[0m", user);
    }

    for (i, table) in config.tables.iter().enumerate() {
        let label = table.name.clone().unwrap_or_else(|| "<default>".to_string());
        println!(
            "\n  \x1b[1;37mTABLE {:02}\x1b[0m \x1b[36m{}\x1b[0m ({} entries)",
            i + 1,
            label,
            table.entries.len()
        );
        for entry in &table.entries {
            println!(
                "    \x1b[38;5;244m{}\x1b[0m → \x1b[32m{}\x1b[0m",
                entry.pattern, entry.address
            );
        }
    }

    for (i, listener) in config.listeners.iter().enumerate() {
        let proto = match listener.protocol {
            Protocol::Tls => "tls",
            Protocol::Http => "http",
        };
        println!(
            "\n  \x1b[1;37mLISTENER {:02}\x1b[0m \x1b[32m{}\x1b[0m \x1b[38;5;244mprotocol\x1b[0m \x1b[36m{}\x1b[0m",
            i + 1,
            listener.address,
            proto
        );
        let table_label = listener.table.clone().unwrap_or_else(|| "<default>".to_string());
        println!("    \x1b[38;5;244m├─ table:\x1b[0m {}", table_label);
        match &listener.fallback {
            Some(addr) => println!("    \x1b[38;5;244m└─ fallback:\x1b[0m \x1b[33m{}\x1b[0m", addr),
            None => println!("    \x1b[38;5;244m└─ fallback:\x1b[0m \x1b[31mnone\x1b[0m"),
        }
    }

    println!("\n\x1b[38;5;240m ══════════════════════════════════════════\x1b[0m");
    println!(" \x1b[1;32m✔\x1b[0m Configuration loaded successfully\n");
}

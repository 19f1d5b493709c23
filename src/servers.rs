//! Known Synapse deployments.

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownServer {
    pub host: &'static str,
    pub description: &'static str,
    pub catalog_id: &'static str,
    pub default: bool,
}

pub const KNOWN_SERVERS: &[KnownServer] = &[
    KnownServer {
        host: "synapse.isrd.isi.edu",
        description: "Synapse Production",
        catalog_id: "1",
        default: true,
    },
    KnownServer {
        host: "synapse-staging.isrd.isi.edu",
        description: "Synapse Staging",
        catalog_id: "1",
        default: false,
    },
    KnownServer {
        host: "synapse-dev.isrd.isi.edu",
        description: "Synapse Development",
        catalog_id: "1",
        default: false,
    },
];

pub fn default_server() -> &'static KnownServer {
    KNOWN_SERVERS
        .iter()
        .find(|s| s.default)
        .unwrap_or(&KNOWN_SERVERS[0])
}

pub fn find_server(host: &str) -> Option<&'static KnownServer> {
    KNOWN_SERVERS.iter().find(|s| s.host == host)
}

/// Point `config` at `host`, taking the catalog id from the known list
/// when the host is one of ours.
pub fn apply_server_override(config: &mut Config, host: &str) {
    config.server.host = host.to_string();
    if let Some(known) = find_server(host) {
        config.server.catalog_id = known.catalog_id.to_string();
    }
}

pub fn list_servers(config: &Config) {
    println!("{:<32} {:<24} {:<8} DEFAULT", "HOST", "DESCRIPTION", "CATALOG");
    for s in KNOWN_SERVERS {
        let marker = match (s.default, s.host == config.server.host) {
            (true, true) => "yes (configured)",
            (true, false) => "yes",
            (false, true) => "(configured)",
            (false, false) => "",
        };
        println!(
            "{:<32} {:<24} {:<8} {}",
            s.host, s.description, s.catalog_id, marker
        );
    }
}

//! Interned String Tables
//!
//! Component fields store small integers; strings live in per-domain
//! tables ("clientId", "color", game-defined domains). Id assignment is
//! sequential within a domain and the tables travel in snapshots, so a
//! restored participant interns new strings at exactly the ids the source
//! would have chosen.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Domain used for participant client ids.
pub const DOMAIN_CLIENT_ID: &str = "clientId";

/// Domain used for color names.
pub const DOMAIN_COLOR: &str = "color";

/// Sentinel for "no interned value" in component storage.
pub const INTERN_NONE: i32 = -1;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct DomainTable {
    by_string: BTreeMap<String, u32>,
    by_id: Vec<String>,
}

/// Per-domain string interner.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringInterner {
    domains: BTreeMap<String, DomainTable>,
}

impl StringInterner {
    /// Empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its stable small integer.
    pub fn intern(&mut self, domain: &str, value: &str) -> u32 {
        let table = self.domains.entry(domain.to_string()).or_default();
        if let Some(id) = table.by_string.get(value) {
            return *id;
        }
        let id = table.by_id.len() as u32;
        table.by_string.insert(value.to_string(), id);
        table.by_id.push(value.to_string());
        id
    }

    /// Id of an already-interned string, if present.
    pub fn lookup(&self, domain: &str, value: &str) -> Option<u32> {
        self.domains.get(domain)?.by_string.get(value).copied()
    }

    /// String for an id in a domain, if present.
    pub fn resolve(&self, domain: &str, id: u32) -> Option<&str> {
        self.domains
            .get(domain)?
            .by_id
            .get(id as usize)
            .map(String::as_str)
    }

    /// Number of entries in a domain.
    pub fn domain_len(&self, domain: &str) -> usize {
        self.domains.get(domain).map_or(0, |t| t.by_id.len())
    }

    /// Export every table for snapshot emission, domains in
    /// lexicographic order, entries in id order.
    pub fn export(&self) -> Vec<(String, Vec<(String, u32)>)> {
        self.domains
            .iter()
            .map(|(domain, table)| {
                let entries = table
                    .by_id
                    .iter()
                    .enumerate()
                    .map(|(id, s)| (s.clone(), id as u32))
                    .collect();
                (domain.clone(), entries)
            })
            .collect()
    }

    /// Replace all tables with exported snapshot data.
    pub fn restore(&mut self, tables: Vec<(String, Vec<(String, u32)>)>) {
        self.domains.clear();
        for (domain, entries) in tables {
            let mut table = DomainTable::default();
            // entries arrive in id order; rebuild both maps
            for (value, id) in entries {
                if table.by_id.len() as u32 != id {
                    // ids are dense by construction; tolerate gaps by
                    // padding so resolve() stays positional
                    while (table.by_id.len() as u32) < id {
                        table.by_id.push(String::new());
                    }
                }
                table.by_string.insert(value.clone(), id);
                table.by_id.push(value);
            }
            self.domains.insert(domain, table);
        }
    }

    /// Drop every table.
    pub fn clear(&mut self) {
        self.domains.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

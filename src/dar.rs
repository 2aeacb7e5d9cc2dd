// 🏠 DAR address resolver
//
// Addresses may reference the national address register (DAR) by an opaque id.
// The resolver turns such an id into a human-readable description, trying the
// "adresser" collection first and then "adgangsadresser".
//
// Every id is looked up at most once per build: hits AND misses are memoized.

use crate::error::{CacheError, Result};
use crate::registry::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_COLLECTIONS: [&str; 2] = ["adresser", "adgangsadresser"];

// ============================================================================
// MEMO TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "address", rename_all = "snake_case")]
pub enum DarEntry {
    /// The lookup document, as returned by the first collection that knew the id
    Resolved(Fields),
    /// No collection knew the id
    NoMatch,
}

impl DarEntry {
    /// The "betegnelse" of a resolved address
    pub fn description(&self) -> Option<&str> {
        match self {
            DarEntry::Resolved(fields) => fields.get("betegnelse").and_then(Value::as_str),
            DarEntry::NoMatch => None,
        }
    }
}

/// DAR id -> lookup outcome
pub type DarMemo = BTreeMap<String, DarEntry>;

// ============================================================================
// LOOKUP
// ============================================================================

/// One lookup attempt against one collection
pub trait AddressLookup {
    fn lookup(&self, collection: &str, id: &str) -> Result<Option<Fields>>;
}

impl<L: AddressLookup + ?Sized> AddressLookup for &L {
    fn lookup(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        (**self).lookup(collection, id)
    }
}

/// Blocking client for the public DAR lookup service
pub struct DawaClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl DawaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(DawaClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl AddressLookup for DawaClient {
    fn lookup(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        let url = format!("{}/{}", self.base_url, collection);
        let response = self
            .client
            .get(&url)
            .query(&[("id", id), ("struktur", "mini")])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Transport {
                url,
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().map_err(|e| CacheError::Decode {
            url: url.clone(),
            detail: e.to_string(),
        })?;

        first_document(body).map_err(|detail| CacheError::Decode { url, detail })
    }
}

/// The service answers with an object or a (possibly empty) array of objects
fn first_document(body: Value) -> std::result::Result<Option<Fields>, String> {
    match body {
        Value::Object(fields) if fields.is_empty() => Ok(None),
        Value::Object(fields) => Ok(Some(fields)),
        Value::Array(items) => match items.into_iter().next() {
            None => Ok(None),
            Some(Value::Object(fields)) => Ok(Some(fields)),
            Some(_) => Err("array item is not an object".to_string()),
        },
        _ => Err("unexpected response shape".to_string()),
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Memoizing resolver; not shared between threads
pub struct DarResolver<L: AddressLookup> {
    lookup: L,
    collections: Vec<String>,
    memo: DarMemo,
    external_calls: usize,
}

impl<L: AddressLookup> DarResolver<L> {
    pub fn new(lookup: L) -> Self {
        Self::with_collections(lookup, DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect())
    }

    pub fn with_collections(lookup: L, collections: Vec<String>) -> Self {
        DarResolver {
            lookup,
            collections,
            memo: DarMemo::new(),
            external_calls: 0,
        }
    }

    /// Description of a DAR id, looking it up on first request only
    pub fn resolve(&mut self, id: &str) -> Result<Option<String>> {
        if let Some(entry) = self.memo.get(id) {
            return Ok(entry.description().map(str::to_string));
        }

        let mut entry = DarEntry::NoMatch;
        for collection in &self.collections {
            self.external_calls += 1;
            if let Some(document) = self.lookup.lookup(collection, id)? {
                entry = DarEntry::Resolved(document);
                break;
            }
        }

        if entry == DarEntry::NoMatch {
            debug!(dar_id = id, "no DAR match");
        }

        let description = entry.description().map(str::to_string);
        self.memo.insert(id.to_string(), entry);
        Ok(description)
    }

    pub fn memo(&self) -> &DarMemo {
        &self.memo
    }

    /// Number of lookups sent to the external service
    pub fn external_calls(&self) -> usize {
        self.external_calls
    }

    pub fn misses(&self) -> usize {
        self.memo.values().filter(|entry| **entry == DarEntry::NoMatch).count()
    }
}

// ============================================================================
// TESTS
// ============================================================================

// 📚 Registry - raw objects and paginated bulk reads
//
// The registry returns objects as { id, registreringer: [ registration, ... ] }.
// Each registration holds attribute ("attributter"), relation ("relationer") and
// state ("tilstande") groups; every value in a group carries its own validity.
//
// Reads are offset/limit paged: request a page, append it, advance the offset,
// stop on the first empty page.

use crate::error::{CacheError, IntegrityError, Result};
use crate::temporal::{Bound, GroupKind, GroupRef, Validity, Virkning};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Payload of one registry value, minus its validity
pub type Fields = serde_json::Map<String, Value>;

// ============================================================================
// RAW OBJECT MODEL
// ============================================================================

/// One attribute value or relation target, with its validity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryValue {
    pub virkning: Virkning,

    #[serde(flatten)]
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationTime {
    pub tidsstempeldatotid: Bound,
}

/// One version of an entity's full attribute/relation set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// When this registration was recorded
    #[serde(default)]
    pub fratidspunkt: Option<RegistrationTime>,

    #[serde(default)]
    pub attributter: BTreeMap<String, Vec<RegistryValue>>,

    #[serde(default)]
    pub relationer: BTreeMap<String, Vec<RegistryValue>>,

    #[serde(default)]
    pub tilstande: BTreeMap<String, Vec<RegistryValue>>,
}

impl Registration {
    /// All values of one group (empty when the group is absent)
    pub fn group(&self, group: GroupRef) -> &[RegistryValue] {
        let groups = match group.kind {
            GroupKind::Attributes => &self.attributter,
            GroupKind::Relations => &self.relationer,
            GroupKind::States => &self.tilstande,
        };
        groups.get(group.name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_group(&self, group: GroupRef) -> bool {
        !self.group(group).is_empty()
    }

    /// Flatten the named groups into (group, from, to, fields) triples
    pub fn validities(&self, groups: &[GroupRef]) -> Vec<Validity<GroupRef, Fields>> {
        groups
            .iter()
            .flat_map(|&group| {
                self.group(group).iter().map(move |value| {
                    Validity::new(
                        group,
                        value.virkning.from,
                        value.virkning.to,
                        value.fields.clone(),
                    )
                })
            })
            .collect()
    }
}

/// An entity as returned by a registry list query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryObject {
    pub id: Uuid,

    #[serde(default)]
    pub registreringer: Vec<Registration>,
}

impl RegistryObject {
    /// Parse one raw object from a page
    pub fn from_raw(raw: Value) -> std::result::Result<Self, IntegrityError> {
        serde_json::from_value(raw).map_err(|e| IntegrityError::MalformedObject(e.to_string()))
    }

    /// The registration in force: the most recently recorded one.
    /// Falls back to the first listed when no timestamps are present.
    pub fn latest(&self) -> Option<&Registration> {
        let stamped = self
            .registreringer
            .iter()
            .filter_map(|reg| reg.fratidspunkt.as_ref().map(|t| (t.tidsstempeldatotid, reg)))
            .max_by_key(|(stamp, _)| *stamp)
            .map(|(_, reg)| reg);

        stamped.or_else(|| self.registreringer.first())
    }
}

/// Best-effort id of a raw object, for reporting objects that fail to parse
pub fn raw_id(raw: &Value) -> Option<Uuid> {
    raw.get("id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// GET a JSON document from the registry
pub trait RegistryTransport {
    fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value>;
}

impl<T: RegistryTransport + ?Sized> RegistryTransport for &T {
    fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        (**self).get(path, params)
    }
}

/// Blocking HTTP transport against the registry's REST interface
pub struct HttpRegistry {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(HttpRegistry {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl RegistryTransport for HttpRegistry {
    fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Transport {
                url,
                status: status.as_u16(),
            });
        }

        response.json::<Value>().map_err(|e| CacheError::Decode {
            url,
            detail: e.to_string(),
        })
    }
}

// ============================================================================
// PAGINATED BULK READER
// ============================================================================

pub const DEFAULT_PAGE_SIZE: usize = 10_000;

pub struct PagedReader<T: RegistryTransport> {
    transport: T,
    page_size: usize,
}

impl<T: RegistryTransport> PagedReader<T> {
    pub fn new(transport: T) -> Self {
        Self::with_page_size(transport, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(transport: T, page_size: usize) -> Self {
        PagedReader {
            transport,
            page_size: page_size.max(1),
        }
    }

    /// Read every object of one class, page by page, until an empty page
    ///
    /// Historic reads ask for the full validity range; otherwise only
    /// currently valid objects are returned. Any failed page aborts the read.
    pub fn fetch_all(&self, path: &str, filter: &[(&str, &str)], historic: bool) -> Result<Vec<Value>> {
        let started = Instant::now();

        let mut params: Vec<(String, String)> = filter
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        params.push(("list".to_string(), "1".to_string()));
        params.push(("maximalantalresultater".to_string(), self.page_size.to_string()));
        if historic {
            params.push(("virkningFra".to_string(), "-infinity".to_string()));
            params.push(("virkningTil".to_string(), "infinity".to_string()));
        }

        debug!(path, ?params, "start reading");

        let mut complete = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut page_params = params.clone();
            page_params.push(("foersteresultat".to_string(), offset.to_string()));

            let body = self.transport.get(path, &page_params)?;
            let page = page_results(path, body)?;
            if page.is_empty() {
                break;
            }

            complete.extend(page);
            offset += self.page_size;
            debug!(
                path,
                read = complete.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "page read"
            );
        }

        info!(
            path,
            objects = complete.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "registry read complete"
        );
        Ok(complete)
    }

    /// The single organisation object; the synthetic root of the unit tree
    pub fn fetch_organisation(&self) -> Result<Uuid> {
        let organisations = self.fetch_all("/organisation/organisation", &[("bvn", "%")], false)?;

        let ids: Vec<Uuid> = organisations.iter().filter_map(raw_id).collect();
        match ids.as_slice() {
            [single] => Ok(*single),
            [] => Err(CacheError::Organisation("no organisation found".to_string())),
            many => Err(CacheError::Organisation(format!(
                "{} organisations found, configure organisation_uuid",
                many.len()
            ))),
        }
    }
}

/// Unwrap `{ "results": [[ ... ]] }`; `{ "results": [] }` is an empty page
fn page_results(path: &str, body: Value) -> Result<Vec<Value>> {
    let decode_error = |detail: &str| CacheError::Decode {
        url: path.to_string(),
        detail: detail.to_string(),
    };

    let mut results = match body {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(results)) => results,
            _ => return Err(decode_error("missing results array")),
        },
        _ => return Err(decode_error("response is not an object")),
    };

    if results.is_empty() {
        return Ok(Vec::new());
    }

    match results.swap_remove(0) {
        Value::Array(objects) => Ok(objects),
        Value::Null => Ok(Vec::new()),
        _ => Err(decode_error("results[0] is not a list")),
    }
}

// ============================================================================
// TESTS
// ============================================================================

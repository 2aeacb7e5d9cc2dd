// Entity extractors
//
// Every entity class goes through the same pipeline:
//
//   registry page -> latest registration -> effect intervals -> records
//
// A class is described by a `Descriptor` (endpoint, filter, relevant groups,
// anchor group) and a projection function that turns one effect interval into
// zero or more records. The pipeline itself lives in `extract` / `project_objects`.

pub mod address;
pub mod classification;
pub mod engagement;
pub mod function;
pub mod manager;
pub mod organisation;

pub use address::{AddressRecord, ADDRESSES};
pub use classification::{ClassLookup, ClassRecord, FacetRecord, CLASSES, FACETS};
pub use engagement::{EngagementRecord, ENGAGEMENTS};
pub use function::{
    AssociationRecord, ItConnectionRecord, KleRecord, LeaveRecord, RelatedRecord, RoleRecord,
    ASSOCIATIONS, IT_CONNECTIONS, KLES, LEAVES, RELATED, ROLES,
};
pub use manager::{ManagerRecord, MANAGERS};
pub use organisation::{ItSystemRecord, UnitRecord, UserRecord, ITSYSTEMS, UNITS, USERS};

use crate::error::{CacheError, IntegrityError, Result};
use crate::quality::IntegrityReport;
use crate::registry::{raw_id, PagedReader, RegistryObject, RegistryTransport};
use crate::temporal::{effects, Effect, GroupRef, SliceMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

// ============================================================================
// ENTITY CLASS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    #[serde(rename = "facets")]
    Facet,
    #[serde(rename = "classes")]
    Class,
    #[serde(rename = "users")]
    User,
    #[serde(rename = "units")]
    Unit,
    #[serde(rename = "addresses")]
    Address,
    #[serde(rename = "engagements")]
    Engagement,
    #[serde(rename = "associations")]
    Association,
    #[serde(rename = "roles")]
    Role,
    #[serde(rename = "leaves")]
    Leave,
    #[serde(rename = "itsystems")]
    ItSystem,
    #[serde(rename = "it_connections")]
    ItConnection,
    #[serde(rename = "managers")]
    Manager,
    #[serde(rename = "kles")]
    Kle,
    #[serde(rename = "related")]
    Related,
}

impl EntityClass {
    /// Extraction order: classification first, everything referencing titles after
    pub const ALL: [EntityClass; 14] = [
        EntityClass::Facet,
        EntityClass::Class,
        EntityClass::User,
        EntityClass::Unit,
        EntityClass::Address,
        EntityClass::Engagement,
        EntityClass::Manager,
        EntityClass::Association,
        EntityClass::Leave,
        EntityClass::Role,
        EntityClass::ItSystem,
        EntityClass::ItConnection,
        EntityClass::Kle,
        EntityClass::Related,
    ];

    /// Table / artifact name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Facet => "facets",
            EntityClass::Class => "classes",
            EntityClass::User => "users",
            EntityClass::Unit => "units",
            EntityClass::Address => "addresses",
            EntityClass::Engagement => "engagements",
            EntityClass::Association => "associations",
            EntityClass::Role => "roles",
            EntityClass::Leave => "leaves",
            EntityClass::ItSystem => "itsystems",
            EntityClass::ItConnection => "it_connections",
            EntityClass::Manager => "managers",
            EntityClass::Kle => "kles",
            EntityClass::Related => "related",
        }
    }

    pub fn from_name(name: &str) -> Option<EntityClass> {
        EntityClass::ALL.iter().copied().find(|class| class.as_str() == name)
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity UUID -> records, one per effect interval, in time order
pub type CacheTable<R> = BTreeMap<Uuid, Vec<R>>;

// ============================================================================
// DESCRIPTOR
// ============================================================================

/// Everything the pipeline needs to know about one entity class
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub class: EntityClass,
    /// Registry list endpoint
    pub path: &'static str,
    /// Class-specific query filter
    pub filter: &'static [(&'static str, &'static str)],
    /// Groups that delimit intervals in full-history mode
    pub relevant: &'static [GroupRef],
    /// Organisation-affiliation group that delimits in current-state mode
    pub anchor: GroupRef,
    /// Groups that must hold a value somewhere in the registration
    pub required: &'static [GroupRef],
    /// Read current state regardless of the requested cache mode
    pub always_current: bool,
}

impl Descriptor {
    pub fn reads_history(&self, historic: bool) -> bool {
        historic && !self.always_current
    }

    pub fn mode(&self, historic: bool) -> SliceMode {
        if self.reads_history(historic) {
            SliceMode::FullHistory
        } else {
            SliceMode::CurrentState
        }
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

/// Why a projection gave up
#[derive(Debug)]
pub enum ProjectError {
    /// Skip this entity and carry on
    Integrity(IntegrityError),
    /// Abort the whole class
    Fatal(CacheError),
}

impl From<IntegrityError> for ProjectError {
    fn from(error: IntegrityError) -> Self {
        ProjectError::Integrity(error)
    }
}

impl From<CacheError> for ProjectError {
    fn from(error: CacheError) -> Self {
        ProjectError::Fatal(error)
    }
}

pub type Projected<R> = std::result::Result<Vec<R>, ProjectError>;

/// Read one class from the registry and project it into a cache table
pub fn extract<T, R, F>(
    reader: &PagedReader<T>,
    descriptor: &Descriptor,
    historic: bool,
    report: &mut IntegrityReport,
    project: F,
) -> Result<CacheTable<R>>
where
    T: RegistryTransport,
    F: FnMut(Uuid, &Effect) -> Projected<R>,
{
    let started = Instant::now();
    let raw = reader.fetch_all(
        descriptor.path,
        descriptor.filter,
        descriptor.reads_history(historic),
    )?;
    let read = raw.len();

    let table = project_objects(raw, descriptor, descriptor.mode(historic), report, project)?;

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        class = descriptor.class.as_str(),
        read,
        entities = table.len(),
        elapsed_s = format!("{:.1}", elapsed),
        "extracted"
    );
    Ok(table)
}

/// Slice and project raw registry objects; independent of any transport
pub fn project_objects<R, F>(
    raw: Vec<Value>,
    descriptor: &Descriptor,
    mode: SliceMode,
    report: &mut IntegrityReport,
    mut project: F,
) -> Result<CacheTable<R>>
where
    F: FnMut(Uuid, &Effect) -> Projected<R>,
{
    let mut table = CacheTable::new();
    let anchor = [descriptor.anchor];

    for value in raw {
        let fallback_id = raw_id(&value);
        let object = match RegistryObject::from_raw(value) {
            Ok(object) => object,
            Err(error) => {
                report.skipped(descriptor.class, fallback_id, &error);
                continue;
            }
        };

        let Some(registration) = object.latest() else {
            let error = IntegrityError::MalformedObject("no registrations".to_string());
            report.skipped(descriptor.class, Some(object.id), &error);
            continue;
        };

        if let Some(group) = descriptor
            .required
            .iter()
            .find(|group| !registration.has_group(**group))
        {
            report.skipped(
                descriptor.class,
                Some(object.id),
                &IntegrityError::missing(group.to_string()),
            );
            continue;
        }

        // Without a delimiting group there are no spans to project
        let delimiting: &[GroupRef] = match mode {
            SliceMode::FullHistory => descriptor.relevant,
            SliceMode::CurrentState => &anchor,
        };
        if !delimiting.iter().any(|group| registration.has_group(*group)) {
            let names: Vec<String> = delimiting.iter().map(ToString::to_string).collect();
            report.skipped(
                descriptor.class,
                Some(object.id),
                &IntegrityError::missing(names.join(" | ")),
            );
            continue;
        }

        let mut records = Vec::new();
        let mut rejected = None;
        for effect in effects(registration, descriptor.relevant, &anchor, mode) {
            match project(object.id, &effect) {
                Ok(projected) => records.extend(projected),
                Err(ProjectError::Integrity(error)) => {
                    rejected = Some(error);
                    break;
                }
                Err(ProjectError::Fatal(error)) => return Err(error),
            }
        }

        if let Some(error) = rejected {
            report.skipped(descriptor.class, Some(object.id), &error);
            continue;
        }

        if !records.is_empty() {
            table.insert(object.id, records);
        }
    }

    Ok(table)
}

// ============================================================================
// TESTS
// ============================================================================

// 🗂️ Organisation cache - the build context
//
// construct -> populate (registry or stored artifacts) -> derive -> read-only
//
// A build either completes every entity class or fails as a whole; a new
// build always produces a new `OrgCache`.

use crate::config::Settings;
use crate::dar::{AddressLookup, DarMemo, DarResolver, DawaClient};
use crate::derived::{calculate_derived_unit_data, calculate_primary_engagements};
use crate::entities::address::project_address;
use crate::entities::classification::{project_class, project_facet};
use crate::entities::engagement::project_engagement;
use crate::entities::function::{
    project_association, project_it_connection, project_kle, project_leave, project_related, project_role,
};
use crate::entities::manager::project_manager;
use crate::entities::organisation::{project_itsystem, project_unit, project_user};
use crate::entities::{
    extract, AddressRecord, AssociationRecord, CacheTable, ClassLookup, ClassRecord, EngagementRecord,
    EntityClass, FacetRecord, ItConnectionRecord, ItSystemRecord, KleRecord, LeaveRecord, ManagerRecord,
    RelatedRecord, RoleRecord, UnitRecord, UserRecord, ADDRESSES, ASSOCIATIONS, CLASSES, ENGAGEMENTS, FACETS,
    ITSYSTEMS, IT_CONNECTIONS, KLES, LEAVES, MANAGERS, RELATED, ROLES, UNITS, USERS,
};
use crate::error::{CacheError, Result};
use crate::quality::{IntegrityReport, IntegritySummary};
use crate::registry::{HttpRegistry, PagedReader, RegistryTransport};
use crate::store::{fingerprint, ArtifactStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Artifact name of the DAR memo table
pub const DAR_ARTIFACT: &str = "dar";
/// Artifact name of the build metadata
pub const META_ARTIFACT: &str = "meta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheMeta {
    historic: bool,
    organisation: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrgCache {
    pub historic: bool,
    /// Synthetic root of the unit tree
    pub organisation: Option<Uuid>,

    pub facets: CacheTable<FacetRecord>,
    pub classes: CacheTable<ClassRecord>,
    pub users: CacheTable<UserRecord>,
    pub units: CacheTable<UnitRecord>,
    pub addresses: CacheTable<AddressRecord>,
    pub engagements: CacheTable<EngagementRecord>,
    pub managers: CacheTable<ManagerRecord>,
    pub associations: CacheTable<AssociationRecord>,
    pub leaves: CacheTable<LeaveRecord>,
    pub roles: CacheTable<RoleRecord>,
    pub itsystems: CacheTable<ItSystemRecord>,
    pub it_connections: CacheTable<ItConnectionRecord>,
    pub kles: CacheTable<KleRecord>,
    pub related: CacheTable<RelatedRecord>,

    pub dar: DarMemo,

    /// Issues found while building; empty for a cache loaded from artifacts
    pub report: IntegrityReport,
}

fn to_payload<T: Serialize>(name: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| CacheError::Artifact {
        name: name.to_string(),
        source,
    })
}

impl OrgCache {
    // ========================================================================
    // POPULATE
    // ========================================================================

    /// Read every entity class from the registry
    ///
    /// Classification is read first so later classes can carry class titles.
    /// DAR addresses are resolved only when a resolver is given.
    pub fn populate<T, L>(
        reader: &PagedReader<T>,
        organisation: Option<Uuid>,
        historic: bool,
        dar: Option<&mut DarResolver<L>>,
    ) -> Result<OrgCache>
    where
        T: RegistryTransport,
        L: AddressLookup,
    {
        let started = Instant::now();
        let organisation = match organisation {
            Some(organisation) => organisation,
            None => reader.fetch_organisation()?,
        };
        info!(%organisation, historic, "populating cache");

        let mut report = IntegrityReport::new();

        let facets = extract(reader, &FACETS, historic, &mut report, project_facet)?;
        let classes = extract(reader, &CLASSES, historic, &mut report, project_class(&facets))?;
        let lookup = ClassLookup::new(&classes);

        let users = extract(reader, &USERS, historic, &mut report, project_user)?;
        let units = extract(
            reader,
            &UNITS,
            historic,
            &mut report,
            project_unit(Some(organisation), lookup),
        )?;

        let (addresses, dar_memo) = match dar {
            Some(resolver) => {
                let addresses = extract(
                    reader,
                    &ADDRESSES,
                    historic,
                    &mut report,
                    project_address(lookup, Some(&mut *resolver)),
                )?;
                info!(
                    lookups = resolver.external_calls(),
                    ids = resolver.memo().len(),
                    misses = resolver.misses(),
                    "resolved DAR addresses"
                );
                (addresses, resolver.memo().clone())
            }
            None => {
                let addresses = extract(
                    reader,
                    &ADDRESSES,
                    historic,
                    &mut report,
                    project_address::<L>(lookup, None),
                )?;
                (addresses, DarMemo::new())
            }
        };

        let engagements = extract(reader, &ENGAGEMENTS, historic, &mut report, project_engagement(lookup))?;
        let managers = extract(reader, &MANAGERS, historic, &mut report, project_manager(lookup))?;
        let associations = extract(reader, &ASSOCIATIONS, historic, &mut report, project_association(lookup))?;
        let leaves = extract(reader, &LEAVES, historic, &mut report, project_leave(lookup))?;
        let roles = extract(reader, &ROLES, historic, &mut report, project_role(lookup))?;
        let itsystems = extract(reader, &ITSYSTEMS, historic, &mut report, project_itsystem)?;
        let it_connections = extract(reader, &IT_CONNECTIONS, historic, &mut report, project_it_connection)?;
        let kles = extract(reader, &KLES, historic, &mut report, project_kle(lookup))?;
        let related = extract(reader, &RELATED, historic, &mut report, project_related)?;

        let cache = OrgCache {
            historic,
            organisation: Some(organisation),
            facets,
            classes,
            users,
            units,
            addresses,
            engagements,
            managers,
            associations,
            leaves,
            roles,
            itsystems,
            it_connections,
            kles,
            related,
            dar: dar_memo,
            report,
        };

        info!(
            entities = cache.entity_count(),
            issues = cache.report.len(),
            elapsed_s = format!("{:.1}", started.elapsed().as_secs_f64()),
            "cache populated"
        );
        Ok(cache)
    }

    /// Rebuild a cache from stored artifacts instead of the registry
    pub fn load(store: &ArtifactStore) -> Result<OrgCache> {
        let meta: CacheMeta = store.load_artifact(META_ARTIFACT)?;
        let table = |class: EntityClass| class.as_str();

        Ok(OrgCache {
            historic: meta.historic,
            organisation: meta.organisation,
            facets: store.load_artifact(table(EntityClass::Facet))?,
            classes: store.load_artifact(table(EntityClass::Class))?,
            users: store.load_artifact(table(EntityClass::User))?,
            units: store.load_artifact(table(EntityClass::Unit))?,
            addresses: store.load_artifact(table(EntityClass::Address))?,
            engagements: store.load_artifact(table(EntityClass::Engagement))?,
            managers: store.load_artifact(table(EntityClass::Manager))?,
            associations: store.load_artifact(table(EntityClass::Association))?,
            leaves: store.load_artifact(table(EntityClass::Leave))?,
            roles: store.load_artifact(table(EntityClass::Role))?,
            itsystems: store.load_artifact(table(EntityClass::ItSystem))?,
            it_connections: store.load_artifact(table(EntityClass::ItConnection))?,
            kles: store.load_artifact(table(EntityClass::Kle))?,
            related: store.load_artifact(table(EntityClass::Related))?,
            dar: store.load_artifact(DAR_ARTIFACT)?,
            report: IntegrityReport::new(),
        })
    }

    // ========================================================================
    // DERIVE
    // ========================================================================

    /// Run both derived-data passes; safe to call more than once
    pub fn derive(&mut self, primary_rank: &[String]) {
        calculate_primary_engagements(&mut self.engagements, &self.classes, primary_rank);
        let unit_issues = calculate_derived_unit_data(&mut self.units, &self.managers);
        self.report.extend(unit_issues);
    }

    // ========================================================================
    // EXPORT
    // ========================================================================

    /// Serialized table of one entity class, with its entity count
    pub fn table_payload(&self, class: EntityClass) -> Result<(String, usize)> {
        let name = class.as_str();
        let payload = match class {
            EntityClass::Facet => (to_payload(name, &self.facets)?, self.facets.len()),
            EntityClass::Class => (to_payload(name, &self.classes)?, self.classes.len()),
            EntityClass::User => (to_payload(name, &self.users)?, self.users.len()),
            EntityClass::Unit => (to_payload(name, &self.units)?, self.units.len()),
            EntityClass::Address => (to_payload(name, &self.addresses)?, self.addresses.len()),
            EntityClass::Engagement => (to_payload(name, &self.engagements)?, self.engagements.len()),
            EntityClass::Association => (to_payload(name, &self.associations)?, self.associations.len()),
            EntityClass::Role => (to_payload(name, &self.roles)?, self.roles.len()),
            EntityClass::Leave => (to_payload(name, &self.leaves)?, self.leaves.len()),
            EntityClass::ItSystem => (to_payload(name, &self.itsystems)?, self.itsystems.len()),
            EntityClass::ItConnection => (to_payload(name, &self.it_connections)?, self.it_connections.len()),
            EntityClass::Manager => (to_payload(name, &self.managers)?, self.managers.len()),
            EntityClass::Kle => (to_payload(name, &self.kles)?, self.kles.len()),
            EntityClass::Related => (to_payload(name, &self.related)?, self.related.len()),
        };
        Ok(payload)
    }

    /// `(name, payload, rows)` for every artifact, in a fixed order
    pub fn artifacts(&self) -> Result<Vec<(String, String, usize)>> {
        let mut artifacts = Vec::with_capacity(EntityClass::ALL.len() + 2);
        for class in EntityClass::ALL {
            let (payload, rows) = self.table_payload(class)?;
            artifacts.push((class.as_str().to_string(), payload, rows));
        }

        let meta = CacheMeta {
            historic: self.historic,
            organisation: self.organisation,
        };
        artifacts.push((DAR_ARTIFACT.to_string(), to_payload(DAR_ARTIFACT, &self.dar)?, self.dar.len()));
        artifacts.push((META_ARTIFACT.to_string(), to_payload(META_ARTIFACT, &meta)?, 1));
        Ok(artifacts)
    }

    /// Write every artifact to the store in one transaction
    pub fn export(&self, store: &ArtifactStore) -> Result<()> {
        store.save_payloads(&self.artifacts()?)?;
        Ok(())
    }

    /// SHA-256 over all artifacts; equal caches give equal fingerprints
    pub fn fingerprint(&self) -> Result<String> {
        let mut combined = String::new();
        for (name, payload, _) in self.artifacts()? {
            combined.push_str(&name);
            combined.push('\n');
            combined.push_str(&payload);
            combined.push('\n');
        }
        Ok(fingerprint(&combined))
    }

    /// Number of entities over all tables
    pub fn entity_count(&self) -> usize {
        self.facets.len()
            + self.classes.len()
            + self.users.len()
            + self.units.len()
            + self.addresses.len()
            + self.engagements.len()
            + self.managers.len()
            + self.associations.len()
            + self.leaves.len()
            + self.roles.len()
            + self.itsystems.len()
            + self.it_connections.len()
            + self.kles.len()
            + self.related.len()
    }
}

// ============================================================================
// BUILD
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    pub historic: bool,
    /// Read stored artifacts instead of the registry
    pub dry_run: bool,
    pub resolve_dar: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub fingerprint: String,
    pub entities: usize,
    pub summary: IntegritySummary,
    /// None for dry runs
    pub receipt_id: Option<i64>,
}

/// A complete build against the configured registry, or from artifacts on a dry run
///
/// Live builds export their artifacts and leave a receipt in `store`.
pub fn build(settings: &Settings, store: &ArtifactStore, options: BuildOptions) -> Result<(OrgCache, BuildOutcome)> {
    if options.dry_run {
        let mut cache = OrgCache::load(store)?;
        cache.derive(&settings.cache.primary_rank);
        let outcome = BuildOutcome {
            fingerprint: cache.fingerprint()?,
            entities: cache.entity_count(),
            summary: cache.report.summary(),
            receipt_id: None,
        };
        return Ok((cache, outcome));
    }

    let receipt_id = store.insert_receipt(Utc::now(), options.historic)?;

    let registry = HttpRegistry::new(&settings.registry.base_url, settings.registry.timeout())?;
    let reader = PagedReader::with_page_size(registry, settings.registry.page_size);

    let mut resolver = if options.resolve_dar && settings.dar.enabled {
        let client = DawaClient::new(&settings.dar.base_url, settings.registry.timeout())?;
        Some(DarResolver::with_collections(client, settings.dar.collections.clone()))
    } else {
        None
    };

    let mut cache = OrgCache::populate(
        &reader,
        settings.registry.organisation_uuid,
        options.historic,
        resolver.as_mut(),
    )?;
    cache.derive(&settings.cache.primary_rank);

    let start_delivery = Utc::now();
    cache.export(store)?;
    let end_delivery = Utc::now();
    store.finish_receipt(
        receipt_id,
        start_delivery,
        end_delivery,
        cache.entity_count(),
        cache.report.len(),
    )?;

    let outcome = BuildOutcome {
        fingerprint: cache.fingerprint()?,
        entities: cache.entity_count(),
        summary: cache.report.summary(),
        receipt_id: Some(receipt_id),
    };
    Ok((cache, outcome))
}

// ============================================================================
// TESTS
// ============================================================================

// 🏷️ Classification - facets and the classes that belong to them
//
// Classes are the typed vocabulary every other entity points at (unit types,
// engagement types, address types, visibility ...). They are extracted first so
// that later extractors can attach human-readable titles to class references.
//
// Both classes are always read in current-state mode.

use super::{CacheTable, Descriptor, EntityClass, Projected};
use crate::error::IntegrityError;
use crate::temporal::{Effect, GroupRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const FACET_PROPERTIES: GroupRef = GroupRef::attribute("facetegenskaber");
const CLASS_PROPERTIES: GroupRef = GroupRef::attribute("klasseegenskaber");
const FACET: GroupRef = GroupRef::relation("facet");
const RESPONSIBLE: GroupRef = GroupRef::relation("ansvarlig");

// ============================================================================
// FACETS
// ============================================================================

pub const FACETS: Descriptor = Descriptor {
    class: EntityClass::Facet,
    path: "/klassifikation/facet",
    filter: &[("bvn", "%")],
    relevant: &[FACET_PROPERTIES],
    anchor: RESPONSIBLE,
    required: &[FACET_PROPERTIES],
    always_current: true,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetRecord {
    pub user_key: String,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_facet(_uuid: Uuid, effect: &Effect) -> Projected<FacetRecord> {
    let Some(user_key) = effect.first_str(FACET_PROPERTIES, "brugervendtnoegle") else {
        return Ok(Vec::new());
    };

    Ok(vec![FacetRecord {
        user_key: user_key.to_string(),
        from_date: effect.from_date(),
        to_date: effect.to_date(),
    }])
}

// ============================================================================
// CLASSES
// ============================================================================

pub const CLASSES: Descriptor = Descriptor {
    class: EntityClass::Class,
    path: "/klassifikation/klasse",
    filter: &[("bvn", "%")],
    relevant: &[CLASS_PROPERTIES, FACET],
    anchor: RESPONSIBLE,
    required: &[CLASS_PROPERTIES, FACET],
    always_current: true,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub user_key: String,
    pub title: String,
    /// "omfang", e.g. the address scope of an address type
    pub scope: Option<String>,
    pub facet: Uuid,
    pub facet_user_key: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

/// Projection for classes; needs the facet table for `facet_user_key`
pub fn project_class<'a>(
    facets: &'a CacheTable<FacetRecord>,
) -> impl FnMut(Uuid, &Effect) -> Projected<ClassRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let Some(properties) = effect.first(CLASS_PROPERTIES) else {
            return Ok(Vec::new());
        };
        let Some(facet) = effect.first_uuid(FACET)? else {
            return Ok(Vec::new());
        };

        let text = |field: &str| properties.get(field).and_then(|v| v.as_str()).map(str::to_string);
        let user_key = text("brugervendtnoegle")
            .ok_or_else(|| IntegrityError::invalid(CLASS_PROPERTIES.to_string(), "no brugervendtnoegle"))?;
        // Classes without a title fall back on their user key
        let title = text("titel").unwrap_or_else(|| user_key.clone());

        Ok(vec![ClassRecord {
            title,
            scope: text("omfang"),
            facet,
            facet_user_key: facets
                .get(&facet)
                .and_then(|records| records.first())
                .map(|record| record.user_key.clone()),
            user_key,
            from_date: effect.from_date(),
            to_date: effect.to_date(),
        }])
    }
}

// ============================================================================
// LOOKUP
// ============================================================================

/// Read-only view used by later extractors to label class references
#[derive(Debug, Clone, Copy)]
pub struct ClassLookup<'a> {
    classes: &'a CacheTable<ClassRecord>,
}

impl<'a> ClassLookup<'a> {
    pub fn new(classes: &'a CacheTable<ClassRecord>) -> Self {
        ClassLookup { classes }
    }

    /// Current-state record of a class
    pub fn get(&self, uuid: Uuid) -> Option<&'a ClassRecord> {
        self.classes.get(&uuid).and_then(|records| records.last())
    }

    pub fn title(&self, uuid: Option<Uuid>) -> Option<String> {
        uuid.and_then(|uuid| self.get(uuid)).map(|class| class.title.clone())
    }

    pub fn user_key(&self, uuid: Option<Uuid>) -> Option<String> {
        uuid.and_then(|uuid| self.get(uuid)).map(|class| class.user_key.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

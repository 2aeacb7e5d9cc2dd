// 🔗 Organisation functions - associations, roles, leaves, IT connections,
// KLE tasks and related units
//
// All of these are `organisationfunktion` objects told apart by their
// `funktionsnavn`, and all are anchored on `tilknyttedeorganisationer`.

use super::{ClassLookup, Descriptor, EntityClass, Projected};
use crate::error::IntegrityError;
use crate::temporal::{uuid_field, Effect, GroupRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PATH: &str = "/organisation/organisationfunktion";
const ORGANISATIONS: GroupRef = GroupRef::relation("tilknyttedeorganisationer");
const UNITS: GroupRef = GroupRef::relation("tilknyttedeenheder");
const USERS: GroupRef = GroupRef::relation("tilknyttedebrugere");
const ITSYSTEMS_REL: GroupRef = GroupRef::relation("tilknyttedeitsystemer");
const CLASSES_REL: GroupRef = GroupRef::relation("tilknyttedeklasser");
const FUNCTION_TYPE: GroupRef = GroupRef::relation("organisatoriskfunktionstype");
const TASKS: GroupRef = GroupRef::relation("opgaver");
const PROPERTIES: GroupRef = GroupRef::attribute("organisationfunktionegenskaber");

// ============================================================================
// ASSOCIATIONS
// ============================================================================

pub const ASSOCIATIONS: Descriptor = Descriptor {
    class: EntityClass::Association,
    path: PATH,
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "Tilknytning")],
    relevant: &[UNITS, USERS, FUNCTION_TYPE, PROPERTIES],
    anchor: ORGANISATIONS,
    required: &[UNITS, USERS, FUNCTION_TYPE],
    always_current: false,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub user: Uuid,
    pub unit: Uuid,
    pub user_key: Option<String>,
    pub association_type: Uuid,
    pub association_type_title: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_association<'a>(
    classes: ClassLookup<'a>,
) -> impl FnMut(Uuid, &Effect) -> Projected<AssociationRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let (Some(user), Some(unit), Some(association_type)) = (
            effect.first_uuid(USERS)?,
            effect.first_uuid(UNITS)?,
            effect.first_uuid(FUNCTION_TYPE)?,
        ) else {
            return Ok(Vec::new());
        };

        Ok(vec![AssociationRecord {
            user,
            unit,
            user_key: user_key(effect),
            association_type,
            association_type_title: classes.title(Some(association_type)),
            from_date: effect.from_date(),
            to_date: effect.to_date(),
        }])
    }
}

// ============================================================================
// ROLES
// ============================================================================

pub const ROLES: Descriptor = Descriptor {
    class: EntityClass::Role,
    path: PATH,
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "Rolle")],
    relevant: &[UNITS, USERS, FUNCTION_TYPE],
    anchor: ORGANISATIONS,
    required: &[UNITS, USERS, FUNCTION_TYPE],
    always_current: false,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub user: Uuid,
    pub unit: Uuid,
    pub role_type: Uuid,
    pub role_type_title: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_role<'a>(classes: ClassLookup<'a>) -> impl FnMut(Uuid, &Effect) -> Projected<RoleRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let (Some(user), Some(unit), Some(role_type)) = (
            effect.first_uuid(USERS)?,
            effect.first_uuid(UNITS)?,
            effect.first_uuid(FUNCTION_TYPE)?,
        ) else {
            return Ok(Vec::new());
        };

        Ok(vec![RoleRecord {
            user,
            unit,
            role_type,
            role_type_title: classes.title(Some(role_type)),
            from_date: effect.from_date(),
            to_date: effect.to_date(),
        }])
    }
}

// ============================================================================
// LEAVES
// ============================================================================

pub const LEAVES: Descriptor = Descriptor {
    class: EntityClass::Leave,
    path: PATH,
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "Orlov")],
    relevant: &[USERS, FUNCTION_TYPE, PROPERTIES],
    anchor: ORGANISATIONS,
    required: &[USERS, FUNCTION_TYPE],
    always_current: false,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRecord {
    pub user: Uuid,
    pub user_key: Option<String>,
    pub leave_type: Uuid,
    pub leave_type_title: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_leave<'a>(classes: ClassLookup<'a>) -> impl FnMut(Uuid, &Effect) -> Projected<LeaveRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let (Some(user), Some(leave_type)) = (effect.first_uuid(USERS)?, effect.first_uuid(FUNCTION_TYPE)?) else {
            return Ok(Vec::new());
        };

        Ok(vec![LeaveRecord {
            user,
            user_key: user_key(effect),
            leave_type,
            leave_type_title: classes.title(Some(leave_type)),
            from_date: effect.from_date(),
            to_date: effect.to_date(),
        }])
    }
}

// ============================================================================
// IT CONNECTIONS
// ============================================================================

pub const IT_CONNECTIONS: Descriptor = Descriptor {
    class: EntityClass::ItConnection,
    path: PATH,
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "IT-system")],
    relevant: &[UNITS, USERS, ITSYSTEMS_REL, PROPERTIES],
    anchor: ORGANISATIONS,
    required: &[ITSYSTEMS_REL],
    always_current: false,
};

/// An account in an IT system, held by either a unit or a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItConnectionRecord {
    pub user: Option<Uuid>,
    pub unit: Option<Uuid>,
    pub username: Option<String>,
    pub itsystem: Uuid,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_it_connection(_uuid: Uuid, effect: &Effect) -> Projected<ItConnectionRecord> {
    let Some(itsystem) = effect.first_uuid(ITSYSTEMS_REL)? else {
        return Ok(Vec::new());
    };
    let (unit, user) = match effect.first_uuid(UNITS)? {
        Some(unit) => (Some(unit), None),
        None => (None, effect.first_uuid(USERS)?),
    };
    if unit.is_none() && user.is_none() {
        return Ok(Vec::new());
    }

    Ok(vec![ItConnectionRecord {
        user,
        unit,
        username: user_key(effect),
        itsystem,
        from_date: effect.from_date(),
        to_date: effect.to_date(),
    }])
}

// ============================================================================
// KLE
// ============================================================================

pub const KLES: Descriptor = Descriptor {
    class: EntityClass::Kle,
    path: PATH,
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "KLE")],
    relevant: &[TASKS, UNITS, CLASSES_REL, PROPERTIES],
    anchor: ORGANISATIONS,
    required: &[TASKS, UNITS, CLASSES_REL],
    always_current: false,
};

/// One KLE number under one aspect for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KleRecord {
    pub unit: Uuid,
    pub kle_number: Uuid,
    pub kle_number_title: Option<String>,
    pub kle_aspect: Uuid,
    pub kle_aspect_title: Option<String>,
    pub user_key: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

/// KLE functions list their aspects in `opgaver`; each aspect becomes a record
pub fn project_kle<'a>(classes: ClassLookup<'a>) -> impl FnMut(Uuid, &Effect) -> Projected<KleRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let (Some(unit), Some(kle_number)) = (effect.first_uuid(UNITS)?, effect.first_uuid(CLASSES_REL)?) else {
            return Ok(Vec::new());
        };

        let mut aspects = Vec::new();
        for task in effect.values_of(TASKS) {
            if let Some(aspect) = uuid_field(task, TASKS)? {
                aspects.push(aspect);
            }
        }
        aspects.sort();
        aspects.dedup();

        Ok(aspects
            .into_iter()
            .map(|kle_aspect| KleRecord {
                unit,
                kle_number,
                kle_number_title: classes.title(Some(kle_number)),
                kle_aspect,
                kle_aspect_title: classes.title(Some(kle_aspect)),
                user_key: user_key(effect),
                from_date: effect.from_date(),
                to_date: effect.to_date(),
            })
            .collect())
    }
}

// ============================================================================
// RELATED UNITS
// ============================================================================

pub const RELATED: Descriptor = Descriptor {
    class: EntityClass::Related,
    path: PATH,
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "Relateret Enhed")],
    relevant: &[UNITS],
    anchor: ORGANISATIONS,
    required: &[UNITS],
    always_current: false,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedRecord {
    pub unit1_uuid: Uuid,
    pub unit2_uuid: Uuid,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

/// A relation links exactly two units; anything else is malformed
pub fn project_related(_uuid: Uuid, effect: &Effect) -> Projected<RelatedRecord> {
    let mut units = Vec::new();
    for value in effect.values_of(UNITS) {
        if let Some(unit) = uuid_field(value, UNITS)? {
            units.push(unit);
        }
    }

    match units.as_slice() {
        [] => Ok(Vec::new()),
        [unit1_uuid, unit2_uuid] => Ok(vec![RelatedRecord {
            unit1_uuid: *unit1_uuid,
            unit2_uuid: *unit2_uuid,
            from_date: effect.from_date(),
            to_date: effect.to_date(),
        }]),
        other => Err(IntegrityError::invalid(
            UNITS.to_string(),
            format!("expected two related units, found {}", other.len()),
        )
        .into()),
    }
}

fn user_key(effect: &Effect) -> Option<String> {
    effect
        .first_str(PROPERTIES, "brugervendtnoegle")
        .map(str::to_string)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::effect;
    use crate::entities::{CacheTable, ProjectError};
    use serde_json::json;

    const UNIT: &str = "00000000-0000-0000-0000-000000000001";
    const USER: &str = "00000000-0000-0000-0000-000000000002";
    const TYPE: &str = "00000000-0000-0000-0000-0000000000c1";

    fn uuid(raw: &str) -> Uuid {
        Uuid::parse_str(raw).unwrap()
    }

    #[test]
    fn test_association_projection() {
        let classes = CacheTable::new();
        let mut project = project_association(ClassLookup::new(&classes));

        let records = project(
            Uuid::from_u128(1),
            &effect(vec![
                (USERS, json!({"uuid": USER})),
                (UNITS, json!({"uuid": UNIT})),
                (FUNCTION_TYPE, json!({"uuid": TYPE})),
                (PROPERTIES, json!({"brugervendtnoegle": "-"})),
            ]),
        )
        .unwrap();

        assert_eq!(records[0].user, uuid(USER));
        assert_eq!(records[0].association_type, uuid(TYPE));
        assert_eq!(records[0].user_key.as_deref(), Some("-"));
    }

    #[test]
    fn test_role_span_missing_user_is_dropped() {
        let classes = CacheTable::new();
        let mut project = project_role(ClassLookup::new(&classes));

        let records = project(
            Uuid::from_u128(1),
            &effect(vec![
                (UNITS, json!({"uuid": UNIT})),
                (FUNCTION_TYPE, json!({"uuid": TYPE})),
            ]),
        )
        .unwrap();

        assert!(records.is_empty());
    }

    #[test]
    fn test_leave_projection() {
        let classes = CacheTable::new();
        let mut project = project_leave(ClassLookup::new(&classes));

        let records = project(
            Uuid::from_u128(1),
            &effect(vec![
                (USERS, json!({"uuid": USER})),
                (FUNCTION_TYPE, json!({"uuid": TYPE})),
            ]),
        )
        .unwrap();

        assert_eq!(records[0].leave_type, uuid(TYPE));
        assert_eq!(records[0].user_key, None);
    }

    #[test]
    fn test_it_connection_prefers_unit_over_user() {
        let records = project_it_connection(
            Uuid::from_u128(1),
            &effect(vec![
                (UNITS, json!({"uuid": UNIT})),
                (USERS, json!({"uuid": USER})),
                (ITSYSTEMS_REL, json!({"uuid": TYPE})),
                (PROPERTIES, json!({"brugervendtnoegle": "anba01"})),
            ]),
        )
        .unwrap();

        assert_eq!(records[0].unit, Some(uuid(UNIT)));
        assert_eq!(records[0].user, None);
        assert_eq!(records[0].username.as_deref(), Some("anba01"));
    }

    #[test]
    fn test_kle_one_record_per_aspect() {
        let classes = CacheTable::new();
        let mut project = project_kle(ClassLookup::new(&classes));

        let records = project(
            Uuid::from_u128(1),
            &effect(vec![
                (UNITS, json!({"uuid": UNIT})),
                (CLASSES_REL, json!({"uuid": TYPE})),
                (TASKS, json!({"objekttype": "aspekt", "uuid": "00000000-0000-0000-0000-0000000000a2"})),
                (TASKS, json!({"objekttype": "aspekt", "uuid": "00000000-0000-0000-0000-0000000000a1"})),
            ]),
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kle_aspect, Uuid::from_u128(0xa1));
        assert_eq!(records[1].kle_aspect, Uuid::from_u128(0xa2));
        assert!(records.iter().all(|r| r.kle_number == uuid(TYPE)));
    }

    #[test]
    fn test_related_needs_two_units() {
        let pair = project_related(
            Uuid::from_u128(1),
            &effect(vec![
                (UNITS, json!({"uuid": UNIT})),
                (UNITS, json!({"uuid": USER})),
            ]),
        )
        .unwrap();
        assert_eq!(pair[0].unit1_uuid, uuid(UNIT));
        assert_eq!(pair[0].unit2_uuid, uuid(USER));

        let single = project_related(Uuid::from_u128(1), &effect(vec![(UNITS, json!({"uuid": UNIT}))]));
        assert!(matches!(
            single,
            Err(ProjectError::Integrity(IntegrityError::InvalidValue { .. }))
        ));
    }
}

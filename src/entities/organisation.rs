// 🏢 Organisation - users, organisational units and IT systems
//
// Units form the organisation tree through `overordnet`. The top-level units
// point at the organisation object itself; such a parent is stored as `None`.
//
// `location`, `manager_uuid` and `acting_manager_uuid` are not read from the
// registry. They stay empty until `derived::calculate_derived_unit_data` runs.

use super::{ClassLookup, Descriptor, EntityClass, Projected};
use crate::temporal::{Effect, GroupRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const BELONGS_TO: GroupRef = GroupRef::relation("tilhoerer");

// ============================================================================
// USERS
// ============================================================================

const USER_PROPERTIES: GroupRef = GroupRef::attribute("brugeregenskaber");
const USER_EXTENSIONS: GroupRef = GroupRef::attribute("brugerudvidelser");
const PERSONS: GroupRef = GroupRef::relation("tilknyttedepersoner");

/// Users carry no validity of their own and are always read as current state
pub const USERS: Descriptor = Descriptor {
    class: EntityClass::User,
    path: "/organisation/bruger",
    filter: &[("bvn", "%")],
    relevant: &[USER_PROPERTIES, USER_EXTENSIONS, PERSONS],
    anchor: BELONGS_TO,
    required: &[USER_EXTENSIONS],
    always_current: true,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_key: Option<String>,
    pub cpr: Option<String>,
    pub fornavn: String,
    pub efternavn: String,
    pub navn: String,
    pub kaldenavn_fornavn: String,
    pub kaldenavn_efternavn: String,
    pub kaldenavn: String,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_user(_uuid: Uuid, effect: &Effect) -> Projected<UserRecord> {
    let Some(extensions) = effect.first(USER_EXTENSIONS) else {
        return Ok(Vec::new());
    };
    let name = |field: &str| {
        extensions
            .get(field)
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let fornavn = name("fornavn");
    let efternavn = name("efternavn");
    let kaldenavn_fornavn = name("kaldenavn_fornavn");
    let kaldenavn_efternavn = name("kaldenavn_efternavn");

    Ok(vec![UserRecord {
        user_key: effect
            .first_str(USER_PROPERTIES, "brugervendtnoegle")
            .map(str::to_string),
        cpr: effect.first_str(PERSONS, "urn").map(cpr_from_urn),
        navn: full_name(&fornavn, &efternavn),
        kaldenavn: full_name(&kaldenavn_fornavn, &kaldenavn_efternavn),
        fornavn,
        efternavn,
        kaldenavn_fornavn,
        kaldenavn_efternavn,
        from_date: effect.from_date(),
        to_date: effect.to_date(),
    }])
}

/// "urn:dk:cpr:person:0101701234" -> "0101701234"
fn cpr_from_urn(urn: &str) -> String {
    match urn.char_indices().rev().nth(9) {
        Some((start, _)) => urn[start..].to_string(),
        None => urn.to_string(),
    }
}

fn full_name(first: &str, last: &str) -> String {
    format!("{} {}", first, last).trim().to_string()
}

// ============================================================================
// UNITS
// ============================================================================

const UNIT_PROPERTIES: GroupRef = GroupRef::attribute("organisationenhedegenskaber");
const PARENT: GroupRef = GroupRef::relation("overordnet");
const UNIT_TYPE: GroupRef = GroupRef::relation("enhedstype");
const LEVEL: GroupRef = GroupRef::relation("niveau");

pub const UNITS: Descriptor = Descriptor {
    class: EntityClass::Unit,
    path: "/organisation/organisationenhed",
    filter: &[("bvn", "%")],
    relevant: &[PARENT, UNIT_TYPE, LEVEL, UNIT_PROPERTIES],
    anchor: BELONGS_TO,
    required: &[PARENT, UNIT_TYPE, UNIT_PROPERTIES],
    always_current: false,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub user_key: String,
    pub name: String,
    pub unit_type: Uuid,
    pub unit_type_title: Option<String>,
    pub level: Option<Uuid>,
    pub level_title: Option<String>,
    /// None for top-level units
    pub parent: Option<Uuid>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,

    // Derived
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub manager_uuid: Option<Uuid>,
    #[serde(default)]
    pub acting_manager_uuid: Option<Uuid>,
}

/// Projection for units; `organisation` is the synthetic root of the tree
pub fn project_unit<'a>(
    organisation: Option<Uuid>,
    classes: ClassLookup<'a>,
) -> impl FnMut(Uuid, &Effect) -> Projected<UnitRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let (Some(user_key), Some(name)) = (
            effect.first_str(UNIT_PROPERTIES, "brugervendtnoegle"),
            effect.first_str(UNIT_PROPERTIES, "enhedsnavn"),
        ) else {
            return Ok(Vec::new());
        };
        let Some(parent) = effect.first_uuid(PARENT)? else {
            return Ok(Vec::new());
        };
        let Some(unit_type) = effect.first_uuid(UNIT_TYPE)? else {
            return Ok(Vec::new());
        };
        let level = effect.first_uuid(LEVEL)?;

        Ok(vec![UnitRecord {
            user_key: user_key.to_string(),
            name: name.to_string(),
            unit_type,
            unit_type_title: classes.title(Some(unit_type)),
            level,
            level_title: classes.title(level),
            parent: Some(parent).filter(|parent| Some(*parent) != organisation),
            from_date: effect.from_date(),
            to_date: effect.to_date(),
            location: None,
            manager_uuid: None,
            acting_manager_uuid: None,
        }])
    }
}

// ============================================================================
// IT SYSTEMS
// ============================================================================

const ITSYSTEM_PROPERTIES: GroupRef = GroupRef::attribute("itsystemegenskaber");

pub const ITSYSTEMS: Descriptor = Descriptor {
    class: EntityClass::ItSystem,
    path: "/organisation/itsystem",
    filter: &[("bvn", "%")],
    relevant: &[ITSYSTEM_PROPERTIES],
    anchor: BELONGS_TO,
    required: &[ITSYSTEM_PROPERTIES],
    always_current: true,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItSystemRecord {
    pub user_key: String,
    pub name: String,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_itsystem(_uuid: Uuid, effect: &Effect) -> Projected<ItSystemRecord> {
    let Some(user_key) = effect.first_str(ITSYSTEM_PROPERTIES, "brugervendtnoegle") else {
        return Ok(Vec::new());
    };
    let name = effect
        .first_str(ITSYSTEM_PROPERTIES, "itsystemnavn")
        .unwrap_or(user_key);

    Ok(vec![ItSystemRecord {
        user_key: user_key.to_string(),
        name: name.to_string(),
        from_date: effect.from_date(),
        to_date: effect.to_date(),
    }])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::classification::ClassRecord;
    use crate::entities::tests::{effect, effect_between, rel};
    use crate::entities::{project_objects, CacheTable};
    use crate::quality::IntegrityReport;
    use serde_json::json;

    const ORG: &str = "00000000-0000-0000-0000-00000000000a";
    const PARENT_UNIT: &str = "00000000-0000-0000-0000-000000000002";
    const UNIT_TYPE_CLASS: &str = "00000000-0000-0000-0000-0000000000c1";

    fn classes() -> CacheTable<ClassRecord> {
        let mut classes = CacheTable::new();
        classes.insert(
            Uuid::parse_str(UNIT_TYPE_CLASS).unwrap(),
            vec![ClassRecord {
                user_key: "Afdeling".to_string(),
                title: "Afdeling".to_string(),
                scope: None,
                facet: Uuid::from_u128(1),
                facet_user_key: Some("org_unit_type".to_string()),
                from_date: NaiveDate::from_ymd_opt(1930, 1, 1).unwrap(),
                to_date: None,
            }],
        );
        classes
    }

    fn unit_effect(parent: &str) -> Effect {
        effect_between(
            "2019-03-01",
            "2021-01-01",
            vec![
                (
                    UNIT_PROPERTIES,
                    json!({"brugervendtnoegle": "hr", "enhedsnavn": "HR"}),
                ),
                (PARENT, json!({"uuid": parent})),
                (UNIT_TYPE, json!({"uuid": UNIT_TYPE_CLASS})),
            ],
        )
    }

    #[test]
    fn test_user_projection() {
        let records = project_user(
            Uuid::from_u128(1),
            &effect(vec![
                (USER_PROPERTIES, json!({"brugervendtnoegle": "anba"})),
                (
                    USER_EXTENSIONS,
                    json!({"fornavn": "Anna", "efternavn": "Bech", "kaldenavn_fornavn": "Anne"}),
                ),
                (PERSONS, json!({"urn": "urn:dk:cpr:person:0101701234"})),
            ]),
        )
        .unwrap();

        let user = &records[0];
        assert_eq!(user.cpr.as_deref(), Some("0101701234"));
        assert_eq!(user.navn, "Anna Bech");
        assert_eq!(user.kaldenavn, "Anne");
        assert_eq!(user.user_key.as_deref(), Some("anba"));
    }

    #[test]
    fn test_cpr_from_short_urn() {
        assert_eq!(cpr_from_urn("123"), "123");
    }

    #[test]
    fn test_unit_projection_with_titles_and_dates() {
        let classes = classes();
        let mut project = project_unit(Uuid::parse_str(ORG).ok(), ClassLookup::new(&classes));

        let records = project(Uuid::from_u128(3), &unit_effect(PARENT_UNIT)).unwrap();

        let unit = &records[0];
        assert_eq!(unit.name, "HR");
        assert_eq!(unit.parent, Uuid::parse_str(PARENT_UNIT).ok());
        assert_eq!(unit.unit_type_title.as_deref(), Some("Afdeling"));
        assert_eq!(unit.level, None);
        assert_eq!(unit.from_date, NaiveDate::from_ymd_opt(2019, 3, 1).unwrap());
        assert_eq!(unit.to_date, NaiveDate::from_ymd_opt(2021, 1, 1));
        assert_eq!(unit.location, None);
    }

    #[test]
    fn test_top_level_unit_has_no_parent() {
        let classes = classes();
        let mut project = project_unit(Uuid::parse_str(ORG).ok(), ClassLookup::new(&classes));

        let records = project(Uuid::from_u128(3), &unit_effect(ORG)).unwrap();

        assert_eq!(records[0].parent, None);
    }

    #[test]
    fn test_unit_span_without_parent_is_dropped() {
        let classes = classes();
        let mut project = project_unit(None, ClassLookup::new(&classes));

        let records = project(
            Uuid::from_u128(3),
            &effect(vec![(
                UNIT_PROPERTIES,
                json!({"brugervendtnoegle": "hr", "enhedsnavn": "HR"}),
            )]),
        )
        .unwrap();

        assert!(records.is_empty());
    }

    #[test]
    fn test_itsystem_name_falls_back_on_user_key() {
        let records = project_itsystem(
            Uuid::from_u128(9),
            &effect(vec![(ITSYSTEM_PROPERTIES, json!({"brugervendtnoegle": "AD"}))]),
        )
        .unwrap();

        assert_eq!(records[0].name, "AD");
    }

    fn bruger(id: &str, belongs_from: Option<&str>) -> serde_json::Value {
        let mut relations = json!({});
        if let Some(from) = belongs_from {
            relations["tilhoerer"] = json!([rel(ORG, from, "infinity")]);
        }
        json!({
            "id": id,
            "registreringer": [{
                "attributter": {"brugerudvidelser": [{
                    "fornavn": "Anna",
                    "efternavn": "Bech",
                    "virkning": {"from": "2021-09-01", "to": "infinity"}
                }]},
                "relationer": relations
            }]
        })
    }

    #[test]
    fn test_current_users_take_names_newer_than_the_organisation() {
        let raw = vec![
            bruger("00000000-0000-0000-0000-000000000001", Some("2015-01-01")),
            bruger("00000000-0000-0000-0000-000000000002", None),
        ];
        let mut report = IntegrityReport::new();

        let table = project_objects(raw, &USERS, USERS.mode(true), &mut report, project_user).unwrap();

        assert_eq!(table.len(), 1);
        let user = &table[&Uuid::from_u128(1)][0];
        assert_eq!(user.navn, "Anna Bech");
        assert_eq!(user.from_date, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());
        assert_eq!(user.to_date, None);

        assert_eq!(report.len(), 1);
        assert_eq!(report.issues[0].kind, "missing_group");
        assert!(report.issues[0].message.contains("tilhoerer"));
    }
}

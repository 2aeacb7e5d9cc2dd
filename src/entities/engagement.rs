// 💼 Engagements - employment of a user in a unit
//
// `primary_boolean` is left unset here and filled in by
// `derived::calculate_primary_engagements`.

use super::{ClassLookup, Descriptor, EntityClass, Projected};
use crate::error::IntegrityError;
use crate::temporal::{Effect, GroupRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const TASKS: GroupRef = GroupRef::relation("opgaver");
const UNITS: GroupRef = GroupRef::relation("tilknyttedeenheder");
const USERS: GroupRef = GroupRef::relation("tilknyttedebrugere");
const FUNCTION_TYPE: GroupRef = GroupRef::relation("organisatoriskfunktionstype");
const PRIMARY: GroupRef = GroupRef::relation("primær");
const PROPERTIES: GroupRef = GroupRef::attribute("organisationfunktionegenskaber");
const EXTENSIONS: GroupRef = GroupRef::attribute("organisationfunktionudvidelser");

pub const ENGAGEMENTS: Descriptor = Descriptor {
    class: EntityClass::Engagement,
    path: "/organisation/organisationfunktion",
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "Engagement")],
    relevant: &[TASKS, UNITS, USERS, FUNCTION_TYPE, PRIMARY, PROPERTIES, EXTENSIONS],
    anchor: GroupRef::relation("tilknyttedeorganisationer"),
    required: &[UNITS, USERS, PROPERTIES],
    always_current: false,
};

/// Number of free-text extension fields
pub const EXTENSION_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub user: Uuid,
    pub unit: Uuid,
    pub user_key: String,
    pub fraction: Option<i64>,
    pub engagement_type: Uuid,
    pub engagement_type_title: Option<String>,
    pub primary_type: Option<Uuid>,
    pub primary_type_title: Option<String>,
    pub job_function: Option<Uuid>,
    pub job_function_title: Option<String>,
    /// "udvidelse_1" .. "udvidelse_10"
    pub extensions: BTreeMap<String, Option<String>>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,

    // Derived
    #[serde(default)]
    pub primary_boolean: Option<bool>,
}

pub fn project_engagement<'a>(
    classes: ClassLookup<'a>,
) -> impl FnMut(Uuid, &Effect) -> Projected<EngagementRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        // Spans without an engagement type are not engagements
        let Some(engagement_type) = effect.first_uuid(FUNCTION_TYPE)? else {
            return Ok(Vec::new());
        };
        let (Some(user), Some(unit)) = (effect.first_uuid(USERS)?, effect.first_uuid(UNITS)?) else {
            return Ok(Vec::new());
        };
        let Some(user_key) = effect.first_str(PROPERTIES, "brugervendtnoegle") else {
            return Ok(Vec::new());
        };

        let extension_values = effect.values_of(EXTENSIONS);
        if extension_values.len() > 1 {
            return Err(IntegrityError::invalid(
                EXTENSIONS.to_string(),
                format!("{} simultaneous values", extension_values.len()),
            )
            .into());
        }
        let extension_fields = extension_values.first();

        let extensions = (1..=EXTENSION_COUNT)
            .map(|n| {
                let key = format!("udvidelse_{}", n);
                let value = extension_fields
                    .and_then(|fields| fields.get(&key))
                    .and_then(|value| value.as_str())
                    .map(str::to_string);
                (key, value)
            })
            .collect();
        let fraction = extension_fields
            .and_then(|fields| fields.get("fraktion"))
            .and_then(|value| value.as_i64());

        let primary_type = effect.first_uuid(PRIMARY)?;
        let job_function = effect.first_uuid(TASKS)?;

        Ok(vec![EngagementRecord {
            user,
            unit,
            user_key: user_key.to_string(),
            fraction,
            engagement_type,
            engagement_type_title: classes.title(Some(engagement_type)),
            primary_type,
            primary_type_title: classes.title(primary_type),
            job_function,
            job_function_title: classes.title(job_function),
            extensions,
            from_date: effect.from_date(),
            to_date: effect.to_date(),
            primary_boolean: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::{effect, rel};
    use crate::entities::{project_objects, CacheTable, ProjectError};
    use crate::quality::IntegrityReport;
    use serde_json::json;

    fn base() -> Vec<(GroupRef, serde_json::Value)> {
        vec![
            (FUNCTION_TYPE, json!({"uuid": "00000000-0000-0000-0000-0000000000c1"})),
            (USERS, json!({"uuid": "00000000-0000-0000-0000-000000000001"})),
            (UNITS, json!({"uuid": "00000000-0000-0000-0000-000000000002"})),
            (PROPERTIES, json!({"brugervendtnoegle": "12345"})),
            (PRIMARY, json!({"uuid": "00000000-0000-0000-0000-0000000000c2"})),
        ]
    }

    #[test]
    fn test_engagement_projection_with_extensions() {
        let classes = CacheTable::new();
        let mut project = project_engagement(ClassLookup::new(&classes));
        let mut values = base();
        values.push((
            EXTENSIONS,
            json!({"fraktion": 800000, "udvidelse_1": "Kontor", "udvidelse_10": "X"}),
        ));

        let records = project(Uuid::from_u128(9), &effect(values)).unwrap();

        let engagement = &records[0];
        assert_eq!(engagement.user_key, "12345");
        assert_eq!(engagement.fraction, Some(800000));
        assert_eq!(engagement.extensions.len(), EXTENSION_COUNT);
        assert_eq!(engagement.extensions["udvidelse_1"].as_deref(), Some("Kontor"));
        assert_eq!(engagement.extensions["udvidelse_10"].as_deref(), Some("X"));
        assert_eq!(engagement.extensions["udvidelse_5"], None);
        assert_eq!(engagement.primary_type, Uuid::parse_str("00000000-0000-0000-0000-0000000000c2").ok());
        assert_eq!(engagement.job_function, None);
        assert_eq!(engagement.primary_boolean, None);
    }

    #[test]
    fn test_span_without_engagement_type_is_dropped() {
        let classes = CacheTable::new();
        let mut project = project_engagement(ClassLookup::new(&classes));
        let values = base().into_iter().filter(|(group, _)| *group != FUNCTION_TYPE).collect();

        assert!(project(Uuid::from_u128(9), &effect(values)).unwrap().is_empty());
    }

    #[test]
    fn test_ambiguous_extensions_reject_the_engagement() {
        let classes = CacheTable::new();
        let mut project = project_engagement(ClassLookup::new(&classes));
        let mut values = base();
        values.push((EXTENSIONS, json!({"udvidelse_1": "a"})));
        values.push((EXTENSIONS, json!({"udvidelse_1": "b"})));

        assert!(matches!(
            project(Uuid::from_u128(9), &effect(values)),
            Err(ProjectError::Integrity(IntegrityError::InvalidValue { .. }))
        ));
    }

    fn moved_engagement(id: &str, organisation_from: Option<&str>) -> serde_json::Value {
        let mut relations = json!({
            "tilknyttedeenheder": [
                rel("00000000-0000-0000-0000-000000000002", "2015-01-01", "2021-04-01"),
                rel("00000000-0000-0000-0000-000000000003", "2021-04-01", "infinity")
            ],
            "tilknyttedebrugere": [rel("00000000-0000-0000-0000-000000000001", "2015-01-01", "infinity")],
            "organisatoriskfunktionstype": [rel("00000000-0000-0000-0000-0000000000c1", "2015-01-01", "infinity")]
        });
        if let Some(from) = organisation_from {
            relations["tilknyttedeorganisationer"] =
                json!([rel("00000000-0000-0000-0000-00000000000a", from, "infinity")]);
        }
        json!({
            "id": id,
            "registreringer": [{
                "attributter": {"organisationfunktionegenskaber": [
                    {"brugervendtnoegle": "12345", "virkning": {"from": "2015-01-01", "to": "infinity"}}
                ]},
                "relationer": relations
            }]
        })
    }

    #[test]
    fn test_current_engagement_follows_the_latest_unit() {
        let classes = CacheTable::new();
        let raw = vec![
            moved_engagement("00000000-0000-0000-0000-000000000009", Some("2015-01-01")),
            moved_engagement("00000000-0000-0000-0000-000000000010", None),
        ];
        let mut report = IntegrityReport::new();

        let table = project_objects(
            raw,
            &ENGAGEMENTS,
            ENGAGEMENTS.mode(false),
            &mut report,
            project_engagement(ClassLookup::new(&classes)),
        )
        .unwrap();

        assert_eq!(table.len(), 1);
        let records = &table[&Uuid::from_u128(9)];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].unit, Uuid::from_u128(3));
        assert_eq!(records[0].user_key, "12345");

        assert_eq!(report.len(), 1);
        assert_eq!(report.issues[0].kind, "missing_group");
        assert_eq!(report.issues[0].uuid, Some(Uuid::from_u128(0x10)));
    }
}

// 👔 Managers - manager functions attached to a unit
//
// A manager function may be vacant (no user). Level and responsibilities are
// both listed in `opgaver` and told apart by their `objekttype`.

use super::{ClassLookup, Descriptor, EntityClass, Projected};
use crate::temporal::{uuid_field, Effect, GroupRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TASKS: GroupRef = GroupRef::relation("opgaver");
const UNITS: GroupRef = GroupRef::relation("tilknyttedeenheder");
const USERS: GroupRef = GroupRef::relation("tilknyttedebrugere");
const FUNCTION_TYPE: GroupRef = GroupRef::relation("organisatoriskfunktionstype");

const LEVEL_TASK: &str = "lederniveau";
const RESPONSIBILITY_TASK: &str = "lederansvar";

pub const MANAGERS: Descriptor = Descriptor {
    class: EntityClass::Manager,
    path: "/organisation/organisationfunktion",
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "Leder")],
    relevant: &[TASKS, UNITS, USERS, FUNCTION_TYPE],
    anchor: GroupRef::relation("tilknyttedeorganisationer"),
    required: &[UNITS, FUNCTION_TYPE],
    always_current: false,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerRecord {
    /// None for a vacant manager position
    pub user: Option<Uuid>,
    pub unit: Uuid,
    pub manager_type: Uuid,
    pub manager_type_title: Option<String>,
    pub manager_level: Option<Uuid>,
    pub manager_level_title: Option<String>,
    pub manager_responsibility: Vec<Uuid>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

pub fn project_manager<'a>(
    classes: ClassLookup<'a>,
) -> impl FnMut(Uuid, &Effect) -> Projected<ManagerRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let (Some(unit), Some(manager_type)) = (effect.first_uuid(UNITS)?, effect.first_uuid(FUNCTION_TYPE)?) else {
            return Ok(Vec::new());
        };

        let mut manager_level = None;
        let mut manager_responsibility = Vec::new();
        for task in effect.values_of(TASKS) {
            let target = uuid_field(task, TASKS)?;
            match (task.get("objekttype").and_then(|v| v.as_str()), target) {
                (Some(LEVEL_TASK), Some(level)) => manager_level = Some(level),
                (Some(RESPONSIBILITY_TASK), Some(responsibility)) => {
                    manager_responsibility.push(responsibility)
                }
                _ => {}
            }
        }
        manager_responsibility.sort();

        Ok(vec![ManagerRecord {
            user: effect.first_uuid(USERS)?,
            unit,
            manager_type,
            manager_type_title: classes.title(Some(manager_type)),
            manager_level,
            manager_level_title: classes.title(manager_level),
            manager_responsibility,
            from_date: effect.from_date(),
            to_date: effect.to_date(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::effect;
    use crate::entities::CacheTable;
    use serde_json::json;

    #[test]
    fn test_manager_level_and_responsibilities() {
        let classes = CacheTable::new();
        let mut project = project_manager(ClassLookup::new(&classes));

        let records = project(
            Uuid::from_u128(1),
            &effect(vec![
                (UNITS, json!({"uuid": "00000000-0000-0000-0000-000000000001"})),
                (USERS, json!({"uuid": "00000000-0000-0000-0000-000000000002"})),
                (FUNCTION_TYPE, json!({"uuid": "00000000-0000-0000-0000-0000000000c1"})),
                (TASKS, json!({"objekttype": "lederansvar", "uuid": "00000000-0000-0000-0000-0000000000b2"})),
                (TASKS, json!({"objekttype": "lederniveau", "uuid": "00000000-0000-0000-0000-0000000000b9"})),
                (TASKS, json!({"objekttype": "lederansvar", "uuid": "00000000-0000-0000-0000-0000000000b1"})),
            ]),
        )
        .unwrap();

        let manager = &records[0];
        assert_eq!(manager.user, Some(Uuid::from_u128(2)));
        assert_eq!(manager.manager_level, Some(Uuid::from_u128(0xb9)));
        assert_eq!(
            manager.manager_responsibility,
            vec![Uuid::from_u128(0xb1), Uuid::from_u128(0xb2)]
        );
    }

    #[test]
    fn test_vacant_manager_keeps_record() {
        let classes = CacheTable::new();
        let mut project = project_manager(ClassLookup::new(&classes));

        let records = project(
            Uuid::from_u128(1),
            &effect(vec![
                (UNITS, json!({"uuid": "00000000-0000-0000-0000-000000000001"})),
                (FUNCTION_TYPE, json!({"uuid": "00000000-0000-0000-0000-0000000000c1"})),
            ]),
        )
        .unwrap();

        assert_eq!(records[0].user, None);
        assert_eq!(records[0].manager_level, None);
        assert!(records[0].manager_responsibility.is_empty());
    }
}

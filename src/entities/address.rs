// 📮 Addresses - contact details attached to a unit or a user
//
// The value sits in the `adresser` relation as a typed URN. DAR addresses only
// carry an id; when a resolver is supplied the id is turned into a description
// (and memoized there). This is the only extractor with an external side effect.

use super::{ClassLookup, Descriptor, EntityClass, Projected};
use crate::dar::{AddressLookup, DarResolver};
use crate::error::IntegrityError;
use crate::temporal::{Effect, GroupRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const UNITS: GroupRef = GroupRef::relation("tilknyttedeenheder");
const USERS: GroupRef = GroupRef::relation("tilknyttedebrugere");
const ADDRESS: GroupRef = GroupRef::relation("adresser");
const FUNCTION_TYPE: GroupRef = GroupRef::relation("organisatoriskfunktionstype");
const TASKS: GroupRef = GroupRef::relation("opgaver");

pub const ADDRESSES: Descriptor = Descriptor {
    class: EntityClass::Address,
    path: "/organisation/organisationfunktion",
    filter: &[("gyldighed", "Aktiv"), ("funktionsnavn", "Adresse")],
    relevant: &[UNITS, USERS, ADDRESS, FUNCTION_TYPE, TASKS],
    anchor: GroupRef::relation("tilknyttedeorganisationer"),
    required: &[ADDRESS, FUNCTION_TYPE],
    always_current: false,
};

// ============================================================================
// SCOPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressScope {
    #[serde(rename = "E-mail")]
    Email,
    #[serde(rename = "Telefon")]
    Phone,
    #[serde(rename = "P-nummer")]
    PNumber,
    #[serde(rename = "EAN")]
    Ean,
    #[serde(rename = "Text")]
    Text,
    #[serde(rename = "Url")]
    Www,
    #[serde(rename = "DAR")]
    Dar,
}

impl AddressScope {
    /// From the `objekttype` of the address relation
    pub fn from_object_type(object_type: &str) -> Result<Self, IntegrityError> {
        match object_type {
            "EMAIL" => Ok(AddressScope::Email),
            "PHONE" => Ok(AddressScope::Phone),
            "PNUMBER" => Ok(AddressScope::PNumber),
            "EAN" => Ok(AddressScope::Ean),
            "TEXT" => Ok(AddressScope::Text),
            "WWW" => Ok(AddressScope::Www),
            "DAR" => Ok(AddressScope::Dar),
            other => Err(IntegrityError::UnknownAddressType(other.to_string())),
        }
    }

    fn urn_prefix(&self) -> &'static str {
        match self {
            AddressScope::Email => "urn:mailto:",
            AddressScope::Phone => "urn:magenta.dk:telefon:",
            AddressScope::PNumber => "urn:dk:cvr:produktionsenhed:",
            AddressScope::Ean => "urn:magenta.dk:ean:",
            AddressScope::Text => "urn:text:",
            AddressScope::Www => "urn:magenta.dk:www:",
            AddressScope::Dar => "urn:dar:",
        }
    }

    /// Strip the scope's URN prefix
    pub fn value_of<'u>(&self, urn: &'u str) -> Result<&'u str, IntegrityError> {
        urn.strip_prefix(self.urn_prefix()).ok_or_else(|| {
            IntegrityError::invalid(
                ADDRESS.to_string(),
                format!("{} does not start with {}", urn, self.urn_prefix()),
            )
        })
    }
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub user: Option<Uuid>,
    pub unit: Option<Uuid>,
    /// None for DAR addresses that were not (or could not be) resolved
    pub value: Option<String>,
    pub scope: AddressScope,
    pub dar_uuid: Option<String>,
    pub address_type: Uuid,
    pub address_type_title: Option<String>,
    pub visibility: Option<Uuid>,
    pub visibility_title: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: Option<NaiveDate>,
}

/// Projection for addresses
///
/// With `dar = None`, DAR ids are kept but no description is looked up.
pub fn project_address<'a, L: AddressLookup + 'a>(
    classes: ClassLookup<'a>,
    mut dar: Option<&'a mut DarResolver<L>>,
) -> impl FnMut(Uuid, &Effect) -> Projected<AddressRecord> + 'a {
    move |_uuid: Uuid, effect: &Effect| {
        let (unit, user) = match effect.first_uuid(UNITS)? {
            Some(unit) => (Some(unit), None),
            None => (None, effect.first_uuid(USERS)?),
        };
        if unit.is_none() && user.is_none() {
            return Ok(Vec::new());
        }

        let Some(address) = effect.first(ADDRESS) else {
            return Ok(Vec::new());
        };
        let Some(address_type) = effect.first_uuid(FUNCTION_TYPE)? else {
            return Ok(Vec::new());
        };

        let field = |name: &str| address.get(name).and_then(|value| value.as_str());
        let object_type = field("objekttype")
            .ok_or_else(|| IntegrityError::invalid(ADDRESS.to_string(), "no objekttype"))?;
        let urn = field("urn").ok_or_else(|| IntegrityError::invalid(ADDRESS.to_string(), "no urn"))?;

        let scope = AddressScope::from_object_type(object_type)?;
        let stripped = scope.value_of(urn)?;

        let (value, dar_uuid) = match scope {
            AddressScope::Dar => {
                let value = match dar.as_deref_mut() {
                    Some(resolver) => resolver.resolve(stripped)?,
                    None => None,
                };
                (value, Some(stripped.to_string()))
            }
            _ => (Some(stripped.to_string()), None),
        };

        let visibility = match effect.first(TASKS) {
            Some(task) if task.get("objekttype").and_then(|v| v.as_str()) == Some("synlighed") => {
                effect.first_uuid(TASKS)?
            }
            _ => None,
        };

        Ok(vec![AddressRecord {
            user,
            unit,
            value,
            scope,
            dar_uuid,
            address_type,
            address_type_title: classes.title(Some(address_type)),
            visibility,
            visibility_title: classes.title(visibility),
            from_date: effect.from_date(),
            to_date: effect.to_date(),
        }])
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::effect;
    use crate::entities::{CacheTable, ProjectError};
    use crate::error::Result;
    use crate::registry::Fields;
    use serde_json::json;
    use std::cell::Cell;

    const UNIT: &str = "00000000-0000-0000-0000-000000000001";
    const USER: &str = "00000000-0000-0000-0000-000000000002";
    const TYPE: &str = "00000000-0000-0000-0000-0000000000c1";
    const PUBLIC: &str = "00000000-0000-0000-0000-0000000000c2";

    struct OneAddress {
        calls: Cell<usize>,
    }

    impl AddressLookup for OneAddress {
        fn lookup(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
            self.calls.set(self.calls.get() + 1);
            if collection == "adresser" && id == "d1" {
                let mut fields = Fields::new();
                fields.insert("betegnelse".to_string(), json!("Torvet 1, 8000 Aarhus C"));
                return Ok(Some(fields));
            }
            Ok(None)
        }
    }

    fn address_effect(owner: (GroupRef, &str), object_type: &str, urn: &str) -> Effect {
        effect(vec![
            (owner.0, json!({"uuid": owner.1})),
            (ADDRESS, json!({"objekttype": object_type, "urn": urn})),
            (FUNCTION_TYPE, json!({"uuid": TYPE})),
            (TASKS, json!({"objekttype": "synlighed", "uuid": PUBLIC})),
        ])
    }

    #[test]
    fn test_scopes_strip_their_prefix() {
        let cases = [
            ("EMAIL", "urn:mailto:hr@kommune.dk", "hr@kommune.dk"),
            ("PHONE", "urn:magenta.dk:telefon:+4512345678", "+4512345678"),
            ("PNUMBER", "urn:dk:cvr:produktionsenhed:1003456789", "1003456789"),
            ("EAN", "urn:magenta.dk:ean:5798000000000", "5798000000000"),
            ("TEXT", "urn:text:%C3%85bent", "%C3%85bent"),
            ("WWW", "urn:magenta.dk:www:https://kommune.dk", "https://kommune.dk"),
        ];
        for (object_type, urn, expected) in cases {
            let scope = AddressScope::from_object_type(object_type).unwrap();
            assert_eq!(scope.value_of(urn).unwrap(), expected);
        }
    }

    #[test]
    fn test_email_address_on_unit() {
        let classes = CacheTable::new();
        let mut project = project_address::<OneAddress>(ClassLookup::new(&classes), None);

        let records = project(
            Uuid::from_u128(5),
            &address_effect((UNITS, UNIT), "EMAIL", "urn:mailto:hr@kommune.dk"),
        )
        .unwrap();

        let address = &records[0];
        assert_eq!(address.unit, Uuid::parse_str(UNIT).ok());
        assert_eq!(address.user, None);
        assert_eq!(address.value.as_deref(), Some("hr@kommune.dk"));
        assert_eq!(address.scope, AddressScope::Email);
        assert_eq!(address.visibility, Uuid::parse_str(PUBLIC).ok());
        assert_eq!(serde_json::to_value(address.scope).unwrap(), json!("E-mail"));
    }

    #[test]
    fn test_dar_address_is_resolved_once() {
        let lookup = OneAddress { calls: Cell::new(0) };
        let mut resolver = DarResolver::new(&lookup);
        let classes = CacheTable::new();

        {
            let mut project = project_address(ClassLookup::new(&classes), Some(&mut resolver));
            for _ in 0..2 {
                let records = project(
                    Uuid::from_u128(5),
                    &address_effect((USERS, USER), "DAR", "urn:dar:d1"),
                )
                .unwrap();
                assert_eq!(records[0].value.as_deref(), Some("Torvet 1, 8000 Aarhus C"));
                assert_eq!(records[0].dar_uuid.as_deref(), Some("d1"));
                assert_eq!(records[0].user, Uuid::parse_str(USER).ok());
            }
        }

        assert_eq!(lookup.calls.get(), 1);
        assert_eq!(resolver.memo().len(), 1);
    }

    #[test]
    fn test_dar_address_without_resolver_keeps_id() {
        let classes = CacheTable::new();
        let mut project = project_address::<OneAddress>(ClassLookup::new(&classes), None);

        let records = project(
            Uuid::from_u128(5),
            &address_effect((UNITS, UNIT), "DAR", "urn:dar:d1"),
        )
        .unwrap();

        assert_eq!(records[0].value, None);
        assert_eq!(records[0].dar_uuid.as_deref(), Some("d1"));
    }

    #[test]
    fn test_unknown_address_type_is_integrity_error() {
        let classes = CacheTable::new();
        let mut project = project_address::<OneAddress>(ClassLookup::new(&classes), None);

        let result = project(
            Uuid::from_u128(5),
            &address_effect((UNITS, UNIT), "FAX", "urn:fax:123"),
        );

        assert!(matches!(
            result,
            Err(ProjectError::Integrity(IntegrityError::UnknownAddressType(t))) if t == "FAX"
        ));
    }
}

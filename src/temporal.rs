// ⏰ Temporal Model - Effect intervals
//
// Every value in the registry carries its own validity ("virkning").
// This module turns those overlapping validities into a minimal ordered list
// of disjoint effect intervals, each tagged with the values that held
// throughout it.
//
// Two layers:
// 1. `slice` - a pure sweep over (key, from, to, value) triples
// 2. `effects` - applies `slice` to a registration's attribute/relation groups

use crate::error::IntegrityError;
use crate::registry::{Fields, Registration};
use chrono::{DateTime, FixedOffset, NaiveDate};
use chrono_tz::Europe::Copenhagen;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Earliest date written to a record when a validity starts at -infinity
pub fn earliest_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1930, 1, 1).unwrap_or(NaiveDate::MIN)
}

// ============================================================================
// BOUND
// ============================================================================

/// One end of a validity interval
///
/// The variant order gives the total order: `-infinity < any instant < infinity`.
/// Instants compare by their UTC value, while keeping the offset the registry
/// wrote them with (so dates are rendered in the registry's local time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    NegInfinity,
    At(DateTime<FixedOffset>),
    Infinity,
}

impl Bound {
    /// Date used for `from_date` in records
    pub fn as_from_date(&self) -> NaiveDate {
        match self {
            Bound::At(instant) => local_date(instant),
            _ => earliest_date(),
        }
    }

    /// Date used for `to_date` in records; `None` means unbounded
    pub fn as_to_date(&self) -> Option<NaiveDate> {
        match self {
            Bound::Infinity => None,
            Bound::NegInfinity => Some(earliest_date()),
            Bound::At(instant) => Some(local_date(instant)),
        }
    }
}

/// Calendar date of an instant as seen by the registry (Danish local time)
fn local_date(instant: &DateTime<FixedOffset>) -> NaiveDate {
    instant.with_timezone(&Copenhagen).date_naive()
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInfinity => write!(f, "-infinity"),
            Bound::Infinity => write!(f, "infinity"),
            Bound::At(instant) => write!(f, "{}", instant.to_rfc3339()),
        }
    }
}

impl FromStr for Bound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "infinity" | "+infinity" => Ok(Bound::Infinity),
            "-infinity" => Ok(Bound::NegInfinity),
            other => parse_instant(other).map(Bound::At),
        }
    }
}

/// Parse the timestamp shapes the registry emits
///
/// "2017-01-01 00:00:00+01", "2017-01-01T00:00:00.000000+01:00",
/// RFC 3339, or a bare date (taken as midnight UTC).
fn parse_instant(s: &str) -> Result<DateTime<FixedOffset>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(instant);
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(instant) = DateTime::parse_from_str(s, format) {
            return Ok(instant);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
        .ok_or_else(|| format!("unrecognised timestamp: {}", s))
}

impl Serialize for Bound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Bound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Validity of a single registry value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Virkning {
    pub from: Bound,
    pub to: Bound,
}

// ============================================================================
// INTERVAL SLICING (pure)
// ============================================================================

/// A value of group `key`, valid over `[from, to)`
#[derive(Debug, Clone, PartialEq)]
pub struct Validity<K, V> {
    pub key: K,
    pub from: Bound,
    pub to: Bound,
    pub value: V,
}

impl<K, V> Validity<K, V> {
    pub fn new(key: K, from: Bound, to: Bound, value: V) -> Self {
        Validity { key, from, to, value }
    }

    /// Active throughout `[start, end)`
    fn covers(&self, start: Bound, end: Bound) -> bool {
        self.from <= start && end <= self.to
    }

    /// Active somewhere in `[start, end)`
    fn overlaps(&self, start: Bound, end: Bound) -> bool {
        self.from < self.to && self.from < end && start < self.to
    }
}

/// When a payload value is carried into a span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carry {
    /// Active throughout the span
    Covering,
    /// Active anywhere in the span; the latest-starting value comes first
    Overlapping,
}

/// A maximal span with one fixed combination of active values per key
#[derive(Debug, Clone, PartialEq)]
pub struct Slice<K: Ord, V> {
    pub from: Bound,
    pub to: Bound,
    pub values: BTreeMap<K, Vec<V>>,
}

/// Sweep the breakpoints of `delimiting` and snapshot every key per span
///
/// Breakpoints come only from `delimiting`; `payload` values are carried along
/// when they are active throughout a span. A span is emitted only when at least
/// one delimiting value is active in it, so gaps in the delimiting validities
/// stay gaps. Adjacent spans with identical snapshots are coalesced.
///
/// Keys seen in the input always appear in a snapshot, with an empty list when
/// nothing is active for them in that span.
pub fn slice<K, V>(delimiting: &[Validity<K, V>], payload: &[Validity<K, V>]) -> Vec<Slice<K, V>>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    slice_with(delimiting, payload, Carry::Covering)
}

/// Like `slice`, choosing how payload values are carried
pub fn slice_with<K, V>(delimiting: &[Validity<K, V>], payload: &[Validity<K, V>], carry: Carry) -> Vec<Slice<K, V>>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    let breakpoints: Vec<Bound> = delimiting
        .iter()
        .filter(|item| item.from < item.to)
        .flat_map(|item| [item.from, item.to])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut payload: Vec<&Validity<K, V>> = payload.iter().collect();
    if carry == Carry::Overlapping {
        payload.sort_by(|a, b| b.from.cmp(&a.from));
    }

    let mut slices: Vec<Slice<K, V>> = Vec::new();

    for window in breakpoints.windows(2) {
        let (start, end) = (window[0], window[1]);
        let mut values: BTreeMap<K, Vec<V>> = BTreeMap::new();
        let mut delimited = false;

        for item in delimiting {
            let active = values.entry(item.key.clone()).or_default();
            if item.covers(start, end) {
                active.push(item.value.clone());
                delimited = true;
            }
        }

        if !delimited {
            continue;
        }

        for item in &payload {
            let active = values.entry(item.key.clone()).or_default();
            let carried = match carry {
                Carry::Covering => item.covers(start, end),
                Carry::Overlapping => item.overlaps(start, end),
            };
            if carried {
                active.push(item.value.clone());
            }
        }

        if let Some(last) = slices.last_mut() {
            if last.to == start && last.values == values {
                last.to = end;
                continue;
            }
        }

        slices.push(Slice {
            from: start,
            to: end,
            values,
        });
    }

    slices
}

// ============================================================================
// REGISTRATION GROUPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKind {
    /// "attributter"
    Attributes,
    /// "relationer"
    Relations,
    /// "tilstande"
    States,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Attributes => "attributter",
            GroupKind::Relations => "relationer",
            GroupKind::States => "tilstande",
        }
    }
}

/// Names one attribute/relation/state group of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupRef {
    pub kind: GroupKind,
    pub name: &'static str,
}

impl GroupRef {
    pub const fn attribute(name: &'static str) -> Self {
        GroupRef {
            kind: GroupKind::Attributes,
            name,
        }
    }

    pub const fn relation(name: &'static str) -> Self {
        GroupRef {
            kind: GroupKind::Relations,
            name,
        }
    }

    pub const fn state(name: &'static str) -> Self {
        GroupRef {
            kind: GroupKind::States,
            name,
        }
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.name)
    }
}

/// Which groups delimit the intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceMode {
    /// Relevant groups delimit; the anchor group is payload
    FullHistory,
    /// The anchor group delimits; relevant groups are payload
    CurrentState,
}

// ============================================================================
// EFFECTS
// ============================================================================

/// One effect interval of a registration
pub type Effect = Slice<GroupRef, Fields>;

/// Slice a registration into effect intervals
///
/// In `FullHistory` the breakpoints come from `relevant`, and `additional`
/// is carried along while it covers a span. In `CurrentState` the roles are
/// swapped, and a relevant value is carried into every anchor span it touches:
/// the registry reports the current value with its own start date, which is
/// usually later than the anchor's.
pub fn effects(
    registration: &Registration,
    relevant: &[GroupRef],
    additional: &[GroupRef],
    mode: SliceMode,
) -> Vec<Effect> {
    let (delimiting, payload) = match mode {
        SliceMode::FullHistory => (relevant, additional),
        SliceMode::CurrentState => (additional, relevant),
    };

    let carry = match mode {
        SliceMode::FullHistory => Carry::Covering,
        SliceMode::CurrentState => Carry::Overlapping,
    };

    slice_with(
        &registration.validities(delimiting),
        &registration.validities(payload),
        carry,
    )
}

impl Slice<GroupRef, Fields> {
    /// All values of a group active in this interval
    pub fn values_of(&self, group: GroupRef) -> &[Fields] {
        self.values.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, group: GroupRef) -> bool {
        !self.values_of(group).is_empty()
    }

    pub fn first(&self, group: GroupRef) -> Option<&Fields> {
        self.values_of(group).first()
    }

    /// String field of the first active value of a group
    pub fn first_str(&self, group: GroupRef, field: &str) -> Option<&str> {
        self.first(group)
            .and_then(|fields| fields.get(field))
            .and_then(|value| value.as_str())
    }

    /// `uuid` of the first active relation target, if any
    pub fn first_uuid(&self, group: GroupRef) -> Result<Option<Uuid>, IntegrityError> {
        match self.first(group) {
            Some(fields) => uuid_field(fields, group),
            None => Ok(None),
        }
    }

    pub fn from_date(&self) -> NaiveDate {
        self.from.as_from_date()
    }

    pub fn to_date(&self) -> Option<NaiveDate> {
        self.to.as_to_date()
    }
}

/// Read the `uuid` field of a relation target
pub fn uuid_field(fields: &Fields, group: GroupRef) -> Result<Option<Uuid>, IntegrityError> {
    match fields.get("uuid").and_then(|value| value.as_str()) {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|e| IntegrityError::invalid(group.to_string(), format!("{}: {}", raw, e))),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> Bound {
        s.parse().unwrap()
    }

    fn v(key: &'static str, from: &str, to: &str, value: i32) -> Validity<&'static str, i32> {
        Validity::new(key, at(from), at(to), value)
    }

    fn registration(raw: serde_json::Value) -> Registration {
        serde_json::from_value(raw).unwrap()
    }

    fn value(uuid: &str, from: &str, to: &str) -> serde_json::Value {
        json!({"uuid": uuid, "virkning": {"from": from, "to": to}})
    }

    const PARENT: GroupRef = GroupRef::relation("overordnet");
    const ORG: GroupRef = GroupRef::relation("tilknyttedeorganisationer");
    const UNIT_TYPE: GroupRef = GroupRef::relation("enhedstype");

    #[test]
    fn test_bound_parsing() {
        assert_eq!(at("infinity"), Bound::Infinity);
        assert_eq!(at("-infinity"), Bound::NegInfinity);

        let lora = at("2017-01-01 00:00:00+01");
        let rfc = at("2016-12-31T23:00:00Z");
        assert_eq!(lora, rfc);
        assert_eq!(lora.as_from_date(), NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());

        let date_only = at("2020-05-04");
        assert_eq!(date_only.as_to_date(), NaiveDate::from_ymd_opt(2020, 5, 4));

        assert!("next tuesday".parse::<Bound>().is_err());
    }

    #[test]
    fn test_dates_are_danish_calendar_dates() {
        // Midnight in Copenhagen is the previous evening in UTC
        assert_eq!(
            at("2016-12-31T23:00:00Z").as_from_date(),
            NaiveDate::from_ymd_opt(2017, 1, 1).unwrap()
        );
        assert_eq!(
            at("2020-06-30T22:00:00Z").as_to_date(),
            NaiveDate::from_ymd_opt(2020, 7, 1)
        );
        assert_eq!(
            at("2020-06-30 23:59:00+02").as_from_date(),
            NaiveDate::from_ymd_opt(2020, 6, 30).unwrap()
        );
    }

    #[test]
    fn test_bound_ordering() {
        assert!(Bound::NegInfinity < at("1900-01-01"));
        assert!(at("9999-12-31") < Bound::Infinity);
        assert!(at("2017-01-01 00:00:00+01") < at("2017-01-01 00:00:00+00"));
    }

    #[test]
    fn test_unbounded_dates() {
        assert_eq!(Bound::Infinity.as_to_date(), None);
        assert_eq!(Bound::NegInfinity.as_from_date(), earliest_date());
    }

    #[test]
    fn test_slice_overlapping_groups() {
        // a: [2020, inf) ; b: [2021, 2022)
        let items = vec![
            v("a", "2020-01-01", "infinity", 1),
            v("b", "2021-01-01", "2022-01-01", 2),
        ];
        let slices = slice(&items, &[]);

        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].from, at("2020-01-01"));
        assert_eq!(slices[0].to, at("2021-01-01"));
        assert_eq!(slices[0].values["a"], vec![1]);
        assert!(slices[0].values["b"].is_empty());
        assert_eq!(slices[1].values["b"], vec![2]);
        assert_eq!(slices[2].from, at("2022-01-01"));
        assert_eq!(slices[2].to, Bound::Infinity);
        assert!(slices[2].values["b"].is_empty());
    }

    #[test]
    fn test_slice_keeps_gaps() {
        let items = vec![
            v("a", "2020-01-01", "2020-06-01", 1),
            v("a", "2021-01-01", "2021-06-01", 1),
        ];
        let slices = slice(&items, &[]);

        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].to, at("2020-06-01"));
        assert_eq!(slices[1].from, at("2021-01-01"));
    }

    #[test]
    fn test_slice_coalesces_identical_neighbours() {
        // Same value split in two registrations back to back
        let items = vec![
            v("a", "2020-01-01", "2021-01-01", 7),
            v("a", "2021-01-01", "infinity", 7),
        ];
        let slices = slice(&items, &[]);

        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].from, at("2020-01-01"));
        assert_eq!(slices[0].to, Bound::Infinity);
    }

    #[test]
    fn test_slice_ignores_empty_validities() {
        let items = vec![
            v("a", "2020-01-01", "2020-01-01", 1),
            v("b", "2020-01-01", "infinity", 2),
        ];
        let slices = slice(&items, &[]);

        assert_eq!(slices.len(), 1);
        assert!(slices[0].values["a"].is_empty());
    }

    #[test]
    fn test_slice_payload_does_not_add_breakpoints() {
        let delimiting = vec![v("org", "2020-01-01", "infinity", 0)];
        let payload = vec![
            v("name", "2020-01-01", "2021-01-01", 1),
            v("name", "2021-01-01", "infinity", 2),
        ];
        let slices = slice(&delimiting, &payload);

        assert_eq!(slices.len(), 1);
        // Neither name covers the whole span, so nothing is carried
        assert!(slices[0].values["name"].is_empty());
    }

    #[test]
    fn test_slices_are_disjoint_and_cover_delimiting_union() {
        let items = vec![
            v("a", "2019-03-01", "2020-01-01", 1),
            v("b", "2019-06-01", "2019-09-01", 2),
            v("a", "2020-01-01", "2020-05-01", 3),
            v("c", "2021-01-01", "infinity", 4),
            v("b", "-infinity", "2018-01-01", 5),
        ];
        let slices = slice(&items, &[]);

        for pair in slices.windows(2) {
            assert!(pair[0].from < pair[0].to);
            assert!(pair[0].to <= pair[1].from);
        }

        // Union of the input: (-inf, 2018) + [2019-03, 2020-05) + [2021, inf)
        let mut covered: Vec<(Bound, Bound)> = Vec::new();
        for s in &slices {
            match covered.last_mut() {
                Some(last) if last.1 == s.from => last.1 = s.to,
                _ => covered.push((s.from, s.to)),
            }
        }
        assert_eq!(
            covered,
            vec![
                (Bound::NegInfinity, at("2018-01-01")),
                (at("2019-03-01"), at("2020-05-01")),
                (at("2021-01-01"), Bound::Infinity),
            ]
        );
    }

    #[test]
    fn test_effects_full_history() {
        let reg = registration(json!({
            "relationer": {
                "overordnet": [
                    value("11111111-1111-1111-1111-111111111111", "2020-01-01 00:00:00+01", "2021-01-01 00:00:00+01"),
                    value("22222222-2222-2222-2222-222222222222", "2021-01-01 00:00:00+01", "infinity")
                ],
                "enhedstype": [
                    value("33333333-3333-3333-3333-333333333333", "2020-01-01 00:00:00+01", "infinity")
                ],
                "tilknyttedeorganisationer": [
                    value("44444444-4444-4444-4444-444444444444", "2020-01-01 00:00:00+01", "infinity")
                ]
            }
        }));

        let found = effects(&reg, &[PARENT, UNIT_TYPE], &[ORG], SliceMode::FullHistory);

        assert_eq!(found.len(), 2);
        assert_eq!(
            found[0].first_uuid(PARENT).unwrap(),
            Some(Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap())
        );
        assert_eq!(found[0].to_date(), NaiveDate::from_ymd_opt(2021, 1, 1));
        assert_eq!(
            found[1].first_uuid(PARENT).unwrap(),
            Some(Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap())
        );
        assert_eq!(found[1].to_date(), None);
        assert!(found[1].has(ORG));
    }

    #[test]
    fn test_effects_current_state_delimits_by_anchor() {
        let reg = registration(json!({
            "relationer": {
                "overordnet": [
                    value("11111111-1111-1111-1111-111111111111", "2020-01-01", "infinity")
                ],
                "tilknyttedeorganisationer": [
                    value("44444444-4444-4444-4444-444444444444", "2019-01-01", "infinity")
                ]
            }
        }));

        let found = effects(&reg, &[PARENT], &[ORG], SliceMode::CurrentState);

        // Only the anchor delimits; the later parent is still carried
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].from_date(), NaiveDate::from_ymd_opt(2019, 1, 1).unwrap());
        assert_eq!(
            found[0].first_uuid(PARENT).unwrap(),
            Some(Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap())
        );
    }

    #[test]
    fn test_current_state_prefers_the_latest_value() {
        let reg = registration(json!({
            "relationer": {
                "overordnet": [
                    value("11111111-1111-1111-1111-111111111111", "2015-01-01", "2021-01-01"),
                    value("22222222-2222-2222-2222-222222222222", "2021-01-01", "infinity")
                ],
                "tilknyttedeorganisationer": [
                    value("44444444-4444-4444-4444-444444444444", "2015-01-01", "infinity")
                ]
            }
        }));

        let found = effects(&reg, &[PARENT], &[ORG], SliceMode::CurrentState);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].values_of(PARENT).len(), 2);
        assert_eq!(
            found[0].first_uuid(PARENT).unwrap(),
            Some(Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap())
        );
    }

    #[test]
    fn test_overlapping_carry_skips_values_outside_the_span() {
        let delimiting = vec![v("org", "2020-01-01", "2021-01-01", 0)];
        let payload = vec![
            v("name", "2019-01-01", "2020-01-01", 1),
            v("name", "2020-06-01", "infinity", 2),
            v("name", "2020-03-01", "2020-03-01", 3),
        ];
        let slices = slice_with(&delimiting, &payload, Carry::Overlapping);

        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].values["name"], vec![2]);
    }

    #[test]
    fn test_swapped_roles_give_same_coverage() {
        let reg = registration(json!({
            "relationer": {
                "overordnet": [
                    value("11111111-1111-1111-1111-111111111111", "2020-01-01", "2020-07-01"),
                    value("22222222-2222-2222-2222-222222222222", "2020-07-01", "infinity")
                ],
                "tilknyttedeorganisationer": [
                    value("44444444-4444-4444-4444-444444444444", "2020-01-01", "infinity")
                ]
            }
        }));

        let coverage = |found: &[Effect]| -> (Bound, Bound) {
            (found.first().unwrap().from, found.last().unwrap().to)
        };

        // Parent relevant in full history vs. parent as anchor in current state
        let full = effects(&reg, &[PARENT], &[ORG], SliceMode::FullHistory);
        let swapped = effects(&reg, &[ORG], &[PARENT], SliceMode::CurrentState);
        assert_eq!(coverage(&full), coverage(&swapped));
        assert_eq!(full.len(), swapped.len());

        // And the other way around
        let full = effects(&reg, &[ORG], &[PARENT], SliceMode::FullHistory);
        let swapped = effects(&reg, &[PARENT], &[ORG], SliceMode::CurrentState);
        assert_eq!(coverage(&full), coverage(&swapped));
    }

    #[test]
    fn test_invalid_uuid_is_integrity_error() {
        let reg = registration(json!({
            "relationer": {
                "overordnet": [value("not-a-uuid", "2020-01-01", "infinity")]
            }
        }));
        let found = effects(&reg, &[PARENT], &[], SliceMode::FullHistory);

        assert!(matches!(
            found[0].first_uuid(PARENT),
            Err(IntegrityError::InvalidValue { .. })
        ));
    }
}

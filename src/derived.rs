// 🧮 Derived data - computed over the fully populated cache
//
// Two passes, both recomputed from scratch on every run:
//
// 1. Primary engagements: per user and per span, exactly one engagement
//    is flagged `primary_boolean = true`.
// 2. Unit data: per unit and per span, the location path (names from the
//    root down), the unit's own manager and the acting manager (nearest
//    ancestor, inclusive, with a staffed manager position).
//
// Records are split at every date where the outcome may change and then
// coalesced again, so running a pass twice gives the same tables.

use crate::entities::{
    CacheTable, ClassLookup, ClassRecord, EngagementRecord, EntityClass, ManagerRecord, UnitRecord,
};
use crate::error::IntegrityError;
use crate::quality::IntegrityReport;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;
use uuid::Uuid;

/// Separator between unit names in `location`
pub const PATH_SEPARATOR: &str = "\\";

/// Default ranking of primary-type classes, by user key, best first
pub const DEFAULT_PRIMARY_RANK: [&str; 3] = ["explicitly-primary", "primary", "non-primary"];

// ============================================================================
// SPANS
// ============================================================================

/// A record valid over `[from_date, to_date)`, `None` meaning unbounded
trait Dated: Clone + PartialEq {
    fn span(&self) -> (NaiveDate, Option<NaiveDate>);
    fn with_span(&self, from: NaiveDate, to: Option<NaiveDate>) -> Self;

    fn active_at(&self, date: NaiveDate) -> bool {
        let (from, to) = self.span();
        from <= date && to.map_or(true, |to| date < to)
    }
}

impl Dated for EngagementRecord {
    fn span(&self) -> (NaiveDate, Option<NaiveDate>) {
        (self.from_date, self.to_date)
    }

    fn with_span(&self, from: NaiveDate, to: Option<NaiveDate>) -> Self {
        EngagementRecord {
            from_date: from,
            to_date: to,
            ..self.clone()
        }
    }
}

impl Dated for UnitRecord {
    fn span(&self) -> (NaiveDate, Option<NaiveDate>) {
        (self.from_date, self.to_date)
    }

    fn with_span(&self, from: NaiveDate, to: Option<NaiveDate>) -> Self {
        UnitRecord {
            from_date: from,
            to_date: to,
            ..self.clone()
        }
    }
}

impl Dated for ManagerRecord {
    fn span(&self) -> (NaiveDate, Option<NaiveDate>) {
        (self.from_date, self.to_date)
    }

    fn with_span(&self, from: NaiveDate, to: Option<NaiveDate>) -> Self {
        ManagerRecord {
            from_date: from,
            to_date: to,
            ..self.clone()
        }
    }
}

fn add_breakpoints<R: Dated>(records: &[R], breakpoints: &mut BTreeSet<NaiveDate>) {
    for record in records {
        let (from, to) = record.span();
        breakpoints.insert(from);
        breakpoints.extend(to);
    }
}

/// Cut a record at every breakpoint strictly inside its span
fn split<R: Dated>(record: &R, breakpoints: &BTreeSet<NaiveDate>) -> Vec<R> {
    let (from, to) = record.span();
    let inner = breakpoints
        .range(from..)
        .copied()
        .filter(|date| *date > from && to.map_or(true, |to| *date < to));

    let mut pieces = Vec::new();
    let mut start = from;
    for cut in inner {
        pieces.push(record.with_span(start, Some(cut)));
        start = cut;
    }
    pieces.push(record.with_span(start, to));
    pieces
}

/// Merge adjacent pieces that differ only in their dates
fn coalesce<R: Dated>(mut pieces: Vec<R>) -> Vec<R> {
    pieces.sort_by_key(|piece| piece.span().0);

    let mut merged: Vec<R> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if let Some(last) = merged.last_mut() {
            let (last_from, last_to) = last.span();
            let (from, to) = piece.span();
            if last_to == Some(from) && piece.with_span(last_from, last_to) == *last {
                *last = last.with_span(last_from, to);
                continue;
            }
        }
        merged.push(piece);
    }
    merged
}

fn record_at<R: Dated>(records: Option<&Vec<R>>, date: NaiveDate) -> Option<&R> {
    records.and_then(|records| records.iter().find(|record| record.active_at(date)))
}

// ============================================================================
// PRIMARY ENGAGEMENTS
// ============================================================================

/// Position of a primary-type class in `rank`; absent or unknown ranks last
fn primary_rank(engagement: &EngagementRecord, classes: ClassLookup<'_>, rank: &[String]) -> usize {
    classes
        .user_key(engagement.primary_type)
        .and_then(|user_key| rank.iter().position(|ranked| *ranked == user_key))
        .unwrap_or(rank.len())
}

/// Flag one primary engagement per user and span
///
/// Within a span the engagement with the best primary-type rank wins; ties go
/// to the smallest engagement UUID.
pub fn calculate_primary_engagements(
    engagements: &mut CacheTable<EngagementRecord>,
    classes: &CacheTable<ClassRecord>,
    rank: &[String],
) {
    let classes = ClassLookup::new(classes);
    let source: &CacheTable<EngagementRecord> = engagements;

    let mut by_user: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    for (uuid, records) in source {
        for user in records.iter().map(|record| record.user).collect::<BTreeSet<_>>() {
            by_user.entry(user).or_default().push(*uuid);
        }
    }

    let mut flagged = 0usize;
    let mut result: CacheTable<EngagementRecord> = CacheTable::new();

    for (user, engagement_ids) in &by_user {
        let owned: Vec<(Uuid, &EngagementRecord)> = engagement_ids
            .iter()
            .flat_map(|uuid| {
                source[uuid]
                    .iter()
                    .filter(|record| record.user == *user)
                    .map(move |record| (*uuid, record))
            })
            .collect();

        let mut breakpoints = BTreeSet::new();
        for (_, record) in &owned {
            add_breakpoints(std::slice::from_ref(*record), &mut breakpoints);
        }

        // After splitting, two pieces either cover the same span or are disjoint
        let mut pieces: Vec<(Uuid, EngagementRecord)> = owned
            .iter()
            .flat_map(|(uuid, record)| split(*record, &breakpoints).into_iter().map(move |p| (*uuid, p)))
            .collect();

        let mut winners: BTreeMap<(NaiveDate, Option<NaiveDate>), (usize, Uuid)> = BTreeMap::new();
        for (uuid, piece) in &pieces {
            let candidate = (primary_rank(piece, classes, rank), *uuid);
            winners
                .entry(piece.span())
                .and_modify(|best| {
                    if candidate < *best {
                        *best = candidate;
                    }
                })
                .or_insert(candidate);
        }

        for (uuid, piece) in pieces.iter_mut() {
            let primary = winners.get(&piece.span()).map(|(_, winner)| *winner == *uuid);
            piece.primary_boolean = primary;
            if primary == Some(true) {
                flagged += 1;
            }
        }

        for (uuid, piece) in pieces {
            result.entry(uuid).or_default().push(piece);
        }
    }

    for records in result.values_mut() {
        *records = coalesce(std::mem::take(records));
    }

    info!(users = by_user.len(), primary_spans = flagged, "calculated primary engagements");
    *engagements = result;
}

// ============================================================================
// UNIT DATA
// ============================================================================

/// The chain `[start, parent, grandparent, ...]` of units active at `date`
///
/// The walk stops at a unit without a parent or at a parent with no record at
/// `date`. A chain longer than the number of units can only be a cycle.
pub fn ancestry_at(
    units: &CacheTable<UnitRecord>,
    start: Uuid,
    date: NaiveDate,
) -> Result<Vec<(Uuid, &UnitRecord)>, IntegrityError> {
    let limit = units.len();
    let mut chain = Vec::new();
    let mut current = Some(start);

    while let Some(uuid) = current {
        let Some(record) = record_at(units.get(&uuid), date) else {
            break;
        };
        if chain.len() >= limit {
            return Err(IntegrityError::CyclicParent {
                unit: start,
                depth: chain.len(),
            });
        }
        chain.push((uuid, record));
        current = record.parent;
    }

    Ok(chain)
}

/// Every unit that is an ancestor of `start` at some point in time, plus `start`
fn ancestor_closure(units: &CacheTable<UnitRecord>, start: Uuid) -> BTreeSet<Uuid> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![start];

    while let Some(uuid) = pending.pop() {
        if !seen.insert(uuid) {
            continue;
        }
        if let Some(records) = units.get(&uuid) {
            pending.extend(records.iter().filter_map(|record| record.parent));
        }
    }
    seen
}

/// Managers by unit, keyed by manager UUID
fn managers_by_unit(managers: &CacheTable<ManagerRecord>) -> BTreeMap<Uuid, Vec<(Uuid, &ManagerRecord)>> {
    let mut index: BTreeMap<Uuid, Vec<(Uuid, &ManagerRecord)>> = BTreeMap::new();
    for (uuid, records) in managers {
        for record in records {
            index.entry(record.unit).or_default().push((*uuid, record));
        }
    }
    index
}

/// Smallest manager UUID active in `unit` at `date`, optionally staffed only
fn manager_at(
    index: &BTreeMap<Uuid, Vec<(Uuid, &ManagerRecord)>>,
    unit: Uuid,
    date: NaiveDate,
    staffed_only: bool,
) -> Option<Uuid> {
    index
        .get(&unit)?
        .iter()
        .filter(|(_, record)| record.active_at(date))
        .filter(|(_, record)| !staffed_only || record.user.is_some())
        .map(|(uuid, _)| *uuid)
        .min()
}

/// Derive `location`, `manager_uuid` and `acting_manager_uuid` for every unit
///
/// A unit caught in a parent cycle keeps its records without derived data and
/// is reported as degraded.
pub fn calculate_derived_unit_data(
    units: &mut CacheTable<UnitRecord>,
    managers: &CacheTable<ManagerRecord>,
) -> IntegrityReport {
    let mut report = IntegrityReport::new();
    let index = managers_by_unit(managers);
    let source: &CacheTable<UnitRecord> = units;
    let mut result: CacheTable<UnitRecord> = CacheTable::new();

    for (uuid, records) in source {
        let mut breakpoints = BTreeSet::new();
        for ancestor in ancestor_closure(source, *uuid) {
            if let Some(ancestor_records) = source.get(&ancestor) {
                add_breakpoints(ancestor_records, &mut breakpoints);
            }
            for (_, manager) in index.get(&ancestor).into_iter().flatten() {
                add_breakpoints(std::slice::from_ref(*manager), &mut breakpoints);
            }
        }

        let derived: Result<Vec<UnitRecord>, IntegrityError> = records
            .iter()
            .flat_map(|record| split(record, &breakpoints))
            .map(|mut piece| {
                let date = piece.from_date;
                let chain = ancestry_at(source, *uuid, date)?;

                let names: Vec<&str> = chain.iter().rev().map(|(_, unit)| unit.name.as_str()).collect();
                piece.location = Some(names.join(PATH_SEPARATOR));
                piece.manager_uuid = manager_at(&index, *uuid, date, false);
                piece.acting_manager_uuid = chain
                    .iter()
                    .find_map(|(ancestor, _)| manager_at(&index, *ancestor, date, true));
                Ok(piece)
            })
            .collect();

        let derived = match derived {
            Ok(pieces) => coalesce(pieces),
            Err(error) => {
                report.degraded(EntityClass::Unit, Some(*uuid), &error);
                records
                    .iter()
                    .map(|record| UnitRecord {
                        location: None,
                        manager_uuid: None,
                        acting_manager_uuid: None,
                        ..record.clone()
                    })
                    .collect()
            }
        };
        result.insert(*uuid, derived);
    }

    info!(units = result.len(), cycles = report.len(), "calculated derived unit data");
    *units = result;
    report
}

// ============================================================================
// TESTS
// ============================================================================

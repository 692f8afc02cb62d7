//! Cron-style scheduler for hub agents (spec.md §4.9).
//!
//! Deliberately hand-rolled rather than built on the `cron` crate: the
//! allowed grammar is a fixed, restricted subset (`*`, `*/N`, `N`, `N-M`,
//! and comma lists of those) and specific malformed forms must be
//! *rejected* (`*/0`, inverted ranges, out-of-range fields) rather than
//! silently accepted the way a general-purpose cron parser would. Policing
//! exactly that grammar is the whole point of this module, so a generic
//! dependency would fight the spec rather than serve it.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::Value;

use crate::{Error, Result};

/// Per-agent cap on scheduled entries (spec.md §4.9).
pub const MAX_ENTRIES_PER_AGENT: usize = 10;

/// One field of a cron expression, already validated against its range.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldMatch {
    Any,
    Step(u32),
    Value(u32),
    Range(u32, u32),
    List(Vec<FieldMatch>),
}

impl FieldMatch {
    fn matches(&self, value: u32) -> bool {
        match self {
            FieldMatch::Any => true,
            FieldMatch::Step(step) => value % step == 0,
            FieldMatch::Value(v) => *v == value,
            FieldMatch::Range(lo, hi) => value >= *lo && value <= *hi,
            FieldMatch::List(items) => items.iter().any(|item| item.matches(value)),
        }
    }
}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<FieldMatch> {
    if raw.contains(',') {
        let items = raw
            .split(',')
            .map(|part| parse_single(part, min, max))
            .collect::<Result<Vec<_>>>()?;
        return Ok(FieldMatch::List(items));
    }
    parse_single(raw, min, max)
}

fn parse_single(raw: &str, min: u32, max: u32) -> Result<FieldMatch> {
    if raw == "*" {
        return Ok(FieldMatch::Any);
    }
    if let Some(step) = raw.strip_prefix("*/") {
        let step: u32 = step
            .parse()
            .map_err(|_| Error::scheduler(format!("invalid step expression: {raw}")))?;
        if step == 0 {
            return Err(Error::scheduler("step of */0 is not a valid cron field"));
        }
        return Ok(FieldMatch::Step(step));
    }
    if let Some((lo, hi)) = raw.split_once('-') {
        let lo: u32 = lo
            .parse()
            .map_err(|_| Error::scheduler(format!("invalid range expression: {raw}")))?;
        let hi: u32 = hi
            .parse()
            .map_err(|_| Error::scheduler(format!("invalid range expression: {raw}")))?;
        if lo > hi {
            return Err(Error::scheduler(format!(
                "inverted range in cron field: {raw}"
            )));
        }
        validate_range(lo, min, max, raw)?;
        validate_range(hi, min, max, raw)?;
        return Ok(FieldMatch::Range(lo, hi));
    }
    let value: u32 = raw
        .parse()
        .map_err(|_| Error::scheduler(format!("invalid cron field: {raw}")))?;
    validate_range(value, min, max, raw)?;
    Ok(FieldMatch::Value(value))
}

fn validate_range(value: u32, min: u32, max: u32, raw: &str) -> Result<()> {
    if value < min || value > max {
        return Err(Error::scheduler(format!(
            "cron field {raw} out of range [{min}, {max}]"
        )));
    }
    Ok(())
}

/// A parsed and validated 5-field cron schedule: minute, hour, day-of-month,
/// month, day-of-week.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: FieldMatch,
    hour: FieldMatch,
    day_of_month: FieldMatch,
    month: FieldMatch,
    day_of_week: FieldMatch,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::scheduler(format!(
                "cron expression must have exactly 5 fields, got {}",
                fields.len()
            )));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// True if `when` (UTC) falls on a matching tick. Day-of-month and
    /// day-of-week are OR'd, matching standard cron semantics: either being
    /// unrestricted (`*`) defers entirely to the other.
    pub fn matches(&self, when: DateTime<Utc>) -> bool {
        let minute = when.minute();
        let hour = when.hour();
        let dom = when.day();
        let month = when.month();
        let dow = when.weekday().num_days_from_sunday();

        if !self.minute.matches(minute) || !self.hour.matches(hour) || !self.month.matches(month) {
            return false;
        }

        let dom_any = matches!(self.day_of_month, FieldMatch::Any);
        let dow_any = matches!(self.day_of_week, FieldMatch::Any);
        match (dom_any, dow_any) {
            (true, true) => true,
            (true, false) => self.day_of_week.matches(dow),
            (false, true) => self.day_of_month.matches(dom),
            (false, false) => self.day_of_month.matches(dom) || self.day_of_week.matches(dow),
        }
    }
}

/// Restricted `eventCondition` grammar for `fireEvent`-triggered entries:
/// `always`, `changed`, or a comparison operator against one literal.
/// Arbitrary script conditions are refused outright (spec.md §4.9).
#[derive(Debug, Clone, PartialEq)]
pub enum EventCondition {
    Always,
    Changed,
    Gt(f64),
    Lt(f64),
    Gte(f64),
    Lte(f64),
    Eq(f64),
    Ne(f64),
}

impl EventCondition {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw {
            "always" => return Ok(EventCondition::Always),
            "changed" => return Ok(EventCondition::Changed),
            _ => {}
        }
        for (prefix, ctor) in [
            (">=", EventCondition::Gte as fn(f64) -> EventCondition),
            ("<=", EventCondition::Lte as fn(f64) -> EventCondition),
            ("==", EventCondition::Eq as fn(f64) -> EventCondition),
            ("!=", EventCondition::Ne as fn(f64) -> EventCondition),
            (">", EventCondition::Gt as fn(f64) -> EventCondition),
            ("<", EventCondition::Lt as fn(f64) -> EventCondition),
        ] {
            if let Some(rest) = raw.strip_prefix(prefix) {
                let value: f64 = rest
                    .trim()
                    .parse()
                    .map_err(|_| Error::scheduler(format!("invalid event condition: {raw}")))?;
                return Ok(ctor(value));
            }
        }
        Err(Error::scheduler(format!(
            "unsupported event condition grammar: {raw}"
        )))
    }

    /// Evaluates against the new value and, for `changed`, the previous one.
    pub(crate) fn evaluate(&self, previous: Option<f64>, current: f64) -> bool {
        match self {
            EventCondition::Always => true,
            EventCondition::Changed => previous != Some(current),
            EventCondition::Gt(v) => current > *v,
            EventCondition::Lt(v) => current < *v,
            EventCondition::Gte(v) => current >= *v,
            EventCondition::Lte(v) => current <= *v,
            EventCondition::Eq(v) => current == *v,
            EventCondition::Ne(v) => current != *v,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(CronSchedule),
    Event {
        name: String,
        condition: EventCondition,
    },
}

/// What a fired entry delivers. Exactly one of `message` or `(tool,
/// tool_input)` is ever present (spec.md §4.9) — modeled as an enum rather
/// than two optional fields so that invariant is structural, not checked.
#[derive(Debug, Clone)]
pub enum SchedulePayload {
    /// Delivered via `runner.sendMessage`.
    Message(String),
    /// Delivered via the hub's `executeToolForAgent(hubAgentId, tool, input)`.
    Tool { tool: String, input: Value },
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: u64,
    pub hub_agent_id: String,
    pub trigger: Trigger,
    pub payload: SchedulePayload,
    pub max_runs: Option<u32>,
    pub run_count: u32,
    pub enabled: bool,
}

impl ScheduleEntry {
    fn exhausted(&self) -> bool {
        matches!(self.max_runs, Some(max) if self.run_count >= max)
    }
}

/// Per-hub schedule registry: cron entries ticked once a minute and
/// event-triggered entries fired on demand via [`Scheduler::fire_event`].
pub struct Scheduler {
    entries: HashMap<u64, ScheduleEntry>,
    next_id: u64,
    last_event_value: HashMap<(String, String), f64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            last_event_value: HashMap::new(),
        }
    }

    fn agent_entry_count(&self, hub_agent_id: &str) -> usize {
        self.entries
            .values()
            .filter(|e| e.hub_agent_id == hub_agent_id)
            .count()
    }

    pub fn add_cron(
        &mut self,
        hub_agent_id: impl Into<String>,
        cron: CronSchedule,
        payload: SchedulePayload,
        max_runs: Option<u32>,
    ) -> Result<u64> {
        let hub_agent_id = hub_agent_id.into();
        if self.agent_entry_count(&hub_agent_id) >= MAX_ENTRIES_PER_AGENT {
            return Err(Error::scheduler(format!(
                "agent {hub_agent_id} already has {MAX_ENTRIES_PER_AGENT} scheduled entries"
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            ScheduleEntry {
                id,
                hub_agent_id,
                trigger: Trigger::Cron(cron),
                payload,
                max_runs,
                run_count: 0,
                enabled: true,
            },
        );
        Ok(id)
    }

    pub fn add_event_trigger(
        &mut self,
        hub_agent_id: impl Into<String>,
        event_name: impl Into<String>,
        condition: EventCondition,
        payload: SchedulePayload,
        max_runs: Option<u32>,
    ) -> Result<u64> {
        let hub_agent_id = hub_agent_id.into();
        if self.agent_entry_count(&hub_agent_id) >= MAX_ENTRIES_PER_AGENT {
            return Err(Error::scheduler(format!(
                "agent {hub_agent_id} already has {MAX_ENTRIES_PER_AGENT} scheduled entries"
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            ScheduleEntry {
                id,
                hub_agent_id,
                trigger: Trigger::Event {
                    name: event_name.into(),
                    condition,
                },
                payload,
                max_runs,
                run_count: 0,
                enabled: true,
            },
        );
        Ok(id)
    }

    pub fn remove(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    pub fn disable(&mut self, id: u64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.enabled = false;
        }
    }

    pub fn enable(&mut self, id: u64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.enabled = true;
        }
    }

    /// Evaluates all cron entries against `now`, bumping `run_count` and
    /// auto-disabling on `maxRuns` exhaustion. Returns `(hub_agent_id,
    /// payload)` pairs for entries that fired this tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<(String, SchedulePayload)> {
        let mut fired = Vec::new();
        for entry in self.entries.values_mut() {
            if !entry.enabled || entry.exhausted() {
                continue;
            }
            let Trigger::Cron(cron) = &entry.trigger else {
                continue;
            };
            if cron.matches(now) {
                entry.run_count += 1;
                fired.push((entry.hub_agent_id.clone(), entry.payload.clone()));
                if entry.exhausted() {
                    entry.enabled = false;
                }
            }
        }
        fired
    }

    /// Evaluates event-triggered entries matching `name`, comparing against
    /// the last value seen for `(hub_agent_id, name)`. Returns fired
    /// entries' payloads (the caller already knows `hub_agent_id`).
    pub fn fire_event(
        &mut self,
        name: &str,
        hub_agent_id: &str,
        value: f64,
    ) -> Vec<SchedulePayload> {
        let key = (hub_agent_id.to_string(), name.to_string());
        let previous = self.last_event_value.get(&key).copied();
        let mut fired = Vec::new();
        for entry in self.entries.values_mut() {
            if !entry.enabled || entry.exhausted() || entry.hub_agent_id != hub_agent_id {
                continue;
            }
            let Trigger::Event {
                name: entry_name,
                condition,
            } = &entry.trigger
            else {
                continue;
            };
            if entry_name != name {
                continue;
            }
            if condition.evaluate(previous, value) {
                entry.run_count += 1;
                fired.push(entry.payload.clone());
                if entry.exhausted() {
                    entry.enabled = false;
                }
            }
        }
        self.last_event_value.insert(key, value);
        fired
    }

    /// Serializes all entries to a restorable snapshot. The id generator is
    /// bumped past the highest restored id so freshly added entries never
    /// collide (spec.md §4.9, "serialize/restore with id-generator bump").
    pub fn snapshot(&self) -> Vec<ScheduleEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn restore(entries: Vec<ScheduleEntry>) -> Self {
        let next_id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let entries = entries.into_iter().map(|e| (e.id, e)).collect();
        Self {
            entries,
            next_id,
            last_event_value: HashMap::new(),
        }
    }
}

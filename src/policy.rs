use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::measurable::ResolutionContext;
use crate::policy::period::Period;

pub mod declaration;
pub mod period;

/// Reserved directive under which a resolved rule records its reference timestamp.
pub const LAST_MODIFIED_KEY: &str = "lastModified";

pub type Directives = BTreeMap<String, DirectiveValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveValue {
    Flag(bool),
    Integer(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Null,
}

impl DirectiveValue {
    /// Whether the directive should be emitted as a present flag.
    pub fn is_truthy(&self) -> bool {
        match self {
            DirectiveValue::Flag(flag) => *flag,
            DirectiveValue::Integer(value) => *value != 0,
            DirectiveValue::Text(text) => !text.is_empty() && text != "0",
            DirectiveValue::Timestamp(_) => true,
            DirectiveValue::Null => false,
        }
    }
}

impl From<bool> for DirectiveValue {
    fn from(flag: bool) -> Self {
        DirectiveValue::Flag(flag)
    }
}

impl From<i32> for DirectiveValue {
    fn from(value: i32) -> Self {
        DirectiveValue::Integer(i64::from(value))
    }
}

impl From<i64> for DirectiveValue {
    fn from(value: i64) -> Self {
        DirectiveValue::Integer(value)
    }
}

impl From<&str> for DirectiveValue {
    fn from(text: &str) -> Self {
        DirectiveValue::Text(text.to_string())
    }
}

impl From<DateTime<Utc>> for DirectiveValue {
    fn from(timestamp: DateTime<Utc>) -> Self {
        DirectiveValue::Timestamp(timestamp)
    }
}

impl Display for DirectiveValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveValue::Flag(flag) => write!(f, "{}", flag),
            DirectiveValue::Integer(value) => write!(f, "{}", value),
            DirectiveValue::Text(text) => write!(f, "{}", text),
            DirectiveValue::Timestamp(timestamp) => write!(f, "{}", timestamp.to_rfc3339()),
            DirectiveValue::Null => write!(f, "null"),
        }
    }
}

impl Serialize for DirectiveValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DirectiveValue::Flag(flag) => serializer.serialize_bool(*flag),
            DirectiveValue::Integer(value) => serializer.serialize_i64(*value),
            DirectiveValue::Text(text) => serializer.serialize_str(text),
            DirectiveValue::Timestamp(timestamp) => serializer.serialize_str(&timestamp.to_rfc3339()),
            DirectiveValue::Null => serializer.serialize_none(),
        }
    }
}

struct DirectiveValueVisitor;

impl<'de> Visitor<'de> for DirectiveValueVisitor {
    type Value = DirectiveValue;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a boolean, an integer, a string or null")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(DirectiveValue::Flag(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(DirectiveValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(DirectiveValue::Integer)
            .map_err(|_| E::custom(format!("directive value {} is out of range", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(DirectiveValue::Text(v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(DirectiveValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(DirectiveValue::Null)
    }
}

impl<'de> Deserialize<'de> for DirectiveValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DirectiveValueVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStrategy {
    Merge,
    Replace,
}

impl Default for OverrideStrategy {
    fn default() -> Self {
        OverrideStrategy::Merge
    }
}

impl Display for OverrideStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OverrideStrategy::Merge => write!(f, "merge"),
            OverrideStrategy::Replace => write!(f, "replace"),
        }
    }
}

impl OverrideStrategy {
    /// Combines `delta` into `target`: replace swaps the whole map, merge lets
    /// `delta` overwrite same-named keys and keeps every other key.
    pub fn apply(self, target: &mut Directives, delta: &Directives) {
        match self {
            OverrideStrategy::Replace => *target = delta.clone(),
            OverrideStrategy::Merge => {
                for (name, value) in delta.iter() {
                    target.insert(name.clone(), value.clone());
                }
            }
        }
    }
}

/// Scope a rule was declared at. Folding runs lowest first, so on conflict the
/// highest level wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    Lowest,
    Low,
    Highest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub offset: Period,
    pub directives: Directives,
}

/// One layer's cache policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyRule {
    pub directives: Directives,
    /// Applied in declaration order, never sorted.
    pub schedule: Vec<ScheduleEntry>,
    pub override_strategy: Option<OverrideStrategy>,
    /// Name of the context field the reference timestamp is measured from.
    pub timestamp_field: Option<String>,
    pub reference_timestamp: Option<DateTime<Utc>>,
}

impl PolicyRule {
    pub fn new(directives: Directives) -> PolicyRule {
        PolicyRule {
            directives,
            ..PolicyRule::default()
        }
    }

    pub fn with_schedule_entry(mut self, offset: Period, directives: Directives) -> Self {
        self.schedule.push(ScheduleEntry { offset, directives });
        self
    }

    pub fn with_override_strategy(mut self, strategy: OverrideStrategy) -> Self {
        self.override_strategy = Some(strategy);
        self
    }

    pub fn with_timestamp_field(mut self, field: &str) -> Self {
        self.timestamp_field = Some(field.to_string());
        self
    }

    pub fn with_reference_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.reference_timestamp = Some(timestamp);
        self
    }

    /// Reads the reference timestamp from the context field this rule names.
    ///
    /// Leaves the rule untouched when no field is named, the field is missing,
    /// or the field has no last-modified capability. A capable field that
    /// reports no timestamp clears the reference timestamp.
    pub fn measure_timestamp(&mut self, context: &dyn ResolutionContext) {
        let field = match &self.timestamp_field {
            Some(field) if !field.is_empty() => field,
            _ => return,
        };
        if let Some(measurable) = context.measurable(field) {
            self.reference_timestamp = measurable.last_modified();
            trace!("Measured {:?} from context field {}", self.reference_timestamp, field);
        }
    }

    pub fn resolve_schedule(&self, strategy: OverrideStrategy) -> PolicyRule {
        self.resolve_schedule_at(strategy, Utc::now())
    }

    /// Applies every due schedule entry to the base directives.
    ///
    /// An entry is due when its offset, added to the last applied candidate
    /// time (initially the reference timestamp), is not after `now`. The
    /// result records the reference timestamp under [`LAST_MODIFIED_KEY`] and
    /// keeps this rule's own override strategy.
    pub fn resolve_schedule_at(&self, strategy: OverrideStrategy, now: DateTime<Utc>) -> PolicyRule {
        let mut running = self.directives.clone();

        if let Some(reference) = self.reference_timestamp {
            let mut baseline = reference;
            for entry in self.schedule.iter() {
                let candidate = match entry.offset.add_to(baseline) {
                    Some(candidate) => candidate,
                    None => {
                        warn!("Schedule offset {} from {} is out of range, skipping", entry.offset, baseline);
                        continue;
                    }
                };
                if candidate <= now {
                    debug!("Applying schedule entry {} ({}) due at {}", entry.offset, strategy, candidate);
                    strategy.apply(&mut running, &entry.directives);
                    baseline = candidate;
                }
            }
        }

        running.insert(
            LAST_MODIFIED_KEY.to_string(),
            self.reference_timestamp.map_or(DirectiveValue::Null, DirectiveValue::Timestamp),
        );

        PolicyRule {
            directives: running,
            schedule: Vec::new(),
            override_strategy: self.override_strategy,
            timestamp_field: self.timestamp_field.clone(),
            reference_timestamp: self.reference_timestamp,
        }
    }

    /// Folds a higher-priority rule into this one.
    pub fn combine(&mut self, other: &PolicyRule, strategy: OverrideStrategy) {
        strategy.apply(&mut self.directives, &other.directives);
    }
}

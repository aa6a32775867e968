use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::policy::period::{Period, PeriodError};
use crate::policy::{DirectiveValue, Directives, OverrideStrategy, PolicyRule};

#[derive(Debug, PartialEq, Eq)]
pub enum DeclarationError {
    InvalidPeriod { literal: String, source: PeriodError },
}

impl Display for DeclarationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationError::InvalidPeriod { literal, source } => {
                write!(f, "invalid override period '{}': {}", literal, source)
            }
        }
    }
}

/// Override table keyed by period literal. Keeps the order entries were declared in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideTable(Vec<(String, Directives)>);

impl OverrideTable {
    pub fn new() -> OverrideTable {
        OverrideTable(Vec::new())
    }

    /// Sets the delta for `literal`. A repeated literal keeps its first position.
    pub fn insert(&mut self, literal: &str, directives: Directives) {
        match self.0.iter_mut().find(|(existing, _)| existing == literal) {
            Some((_, existing)) => *existing = directives,
            None => self.0.push((literal.to_string(), directives)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Directives)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for OverrideTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (literal, directives) in self.0.iter() {
            map.serialize_entry(literal, directives)?;
        }
        map.end()
    }
}

struct OverrideTableVisitor;

impl<'de> Visitor<'de> for OverrideTableVisitor {
    type Value = OverrideTable;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map from period literal to directives")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut table = OverrideTable::new();
        while let Some((literal, directives)) = access.next_entry::<String, Directives>()? {
            table.insert(&literal, directives);
        }
        Ok(table)
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(OverrideTable::new())
    }
}

impl<'de> Deserialize<'de> for OverrideTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OverrideTableVisitor)
    }
}

/// Declarative cache policy, as attached to a scope, an action or the global configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDeclaration {
    pub value: Directives,
    #[serde(rename = "override")]
    pub overrides: OverrideTable,
    /// Response statuses the policy must not be applied to.
    pub exclude_status: Vec<u16>,
    pub override_strategy: Option<OverrideStrategy>,
    pub timestamped_parameter: Option<String>,
}

impl PolicyDeclaration {
    pub fn new() -> PolicyDeclaration {
        PolicyDeclaration::default()
    }

    pub fn with_directive<V: Into<DirectiveValue>>(mut self, name: &str, value: V) -> Self {
        self.value.insert(name.to_string(), value.into());
        self
    }

    pub fn with_override(mut self, literal: &str, directives: Directives) -> Self {
        self.overrides.insert(literal, directives);
        self
    }

    pub fn with_excluded_status(mut self, status: u16) -> Self {
        self.exclude_status.push(status);
        self
    }

    pub fn with_override_strategy(mut self, strategy: OverrideStrategy) -> Self {
        self.override_strategy = Some(strategy);
        self
    }

    pub fn with_timestamped_parameter(mut self, field: &str) -> Self {
        self.timestamped_parameter = Some(field.to_string());
        self
    }

    pub fn excludes(&self, status: u16) -> bool {
        self.exclude_status.contains(&status)
    }

    pub fn to_rule(&self) -> Result<PolicyRule, DeclarationError> {
        PolicyRule::try_from(self)
    }
}

impl TryFrom<&PolicyDeclaration> for PolicyRule {
    type Error = DeclarationError;

    fn try_from(declaration: &PolicyDeclaration) -> Result<Self, Self::Error> {
        let mut rule = PolicyRule::new(declaration.value.clone());
        for (literal, directives) in declaration.overrides.iter() {
            let offset: Period = literal.parse().map_err(|source| DeclarationError::InvalidPeriod {
                literal: literal.clone(),
                source,
            })?;
            rule = rule.with_schedule_entry(offset, directives.clone());
        }
        rule.override_strategy = declaration.override_strategy;
        rule.timestamp_field = declaration.timestamped_parameter.clone();
        Ok(rule)
    }
}

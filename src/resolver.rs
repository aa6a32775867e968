use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use log::{debug, trace};

use crate::measurable::ResolutionContext;
use crate::policy::{OverrideStrategy, PolicyRule, PriorityLevel};

#[derive(Debug, PartialEq, Eq)]
pub enum ResolveError {
    NoPolicy,
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NoPolicy => write!(f, "no cache policy registered to resolve"),
        }
    }
}

/// Folds the rules registered at each priority level into one effective rule.
///
/// A resolver serves a single resolution; `resolve` consumes it.
#[derive(Debug, Default)]
pub struct PolicyResolver {
    rules: BTreeMap<PriorityLevel, PolicyRule>,
}

impl PolicyResolver {
    pub fn new() -> PolicyResolver {
        PolicyResolver {
            rules: BTreeMap::new(),
        }
    }

    /// Registers `rule` at `level`, replacing any rule already there. `None` is ignored.
    pub fn register(&mut self, rule: Option<PolicyRule>, level: PriorityLevel) -> &mut Self {
        if let Some(rule) = rule {
            trace!("Registering cache policy at {:?}", level);
            self.rules.insert(level, rule);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Context field named by the highest-priority rule that declares one.
    pub fn timestamp_field(&self) -> Option<&str> {
        self.rules
            .values()
            .rev()
            .filter_map(|rule| rule.timestamp_field.as_deref())
            .find(|field| !field.is_empty())
    }

    /// Strategy declared by the highest-priority rule that declares one, merge otherwise.
    pub fn effective_strategy(&self) -> OverrideStrategy {
        let mut strategy = OverrideStrategy::default();
        for rule in self.rules.values() {
            if let Some(declared) = rule.override_strategy {
                strategy = declared;
            }
        }
        strategy
    }

    pub fn resolve(self, context: &dyn ResolutionContext) -> Result<PolicyRule, ResolveError> {
        self.resolve_at(context, Utc::now())
    }

    pub fn resolve_at(mut self, context: &dyn ResolutionContext, now: DateTime<Utc>) -> Result<PolicyRule, ResolveError> {
        if let Some(field) = self.timestamp_field().map(str::to_string) {
            for rule in self.rules.values_mut() {
                rule.timestamp_field = Some(field.clone());
                rule.measure_timestamp(context);
            }
        }

        let strategy = self.effective_strategy();
        debug!("Resolving {} cache policies with {} strategy", self.rules.len(), strategy);

        let mut resolved = self
            .rules
            .into_iter()
            .map(|(_, rule)| rule.resolve_schedule_at(strategy, now));
        let mut accumulator = resolved.next().ok_or(ResolveError::NoPolicy)?;
        for rule in resolved {
            accumulator.combine(&rule, strategy);
        }
        Ok(accumulator)
    }
}

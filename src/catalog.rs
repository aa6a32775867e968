use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use log::debug;

use crate::policy::declaration::{DeclarationError, PolicyDeclaration};
use crate::policy::{PolicyRule, PriorityLevel};
use crate::resolver::PolicyResolver;

#[derive(Debug)]
pub enum CatalogError {
    Declaration { target: String, source: DeclarationError },
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Declaration { target, source } => write!(f, "cache policy for {}: {}", target, source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub rule: PolicyRule,
    pub exclude_status: Vec<u16>,
}

impl CatalogEntry {
    fn from_declaration(target: &str, declaration: &PolicyDeclaration) -> Result<CatalogEntry, CatalogError> {
        let rule = declaration.to_rule().map_err(|source| CatalogError::Declaration {
            target: target.to_string(),
            source,
        })?;
        Ok(CatalogEntry {
            rule,
            exclude_status: declaration.exclude_status.clone(),
        })
    }
}

/// Policies declared for the whole application, for route scopes and for single actions.
///
/// Every declaration is converted once when registered; requests get clones
/// of the converted rules.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    global: CatalogEntry,
    scopes: Vec<(String, CatalogEntry)>,
    actions: HashMap<String, CatalogEntry>,
}

impl PolicyCatalog {
    pub fn new(global: &PolicyDeclaration) -> Result<PolicyCatalog, CatalogError> {
        Ok(PolicyCatalog {
            global: CatalogEntry::from_declaration("global configuration", global)?,
            scopes: Vec::new(),
            actions: HashMap::new(),
        })
    }

    /// Registers a policy for every route whose pattern starts with `prefix`.
    pub fn scope(mut self, prefix: &str, declaration: &PolicyDeclaration) -> Result<Self, CatalogError> {
        let entry = CatalogEntry::from_declaration(prefix, declaration)?;
        self.scopes.retain(|(existing, _)| existing != prefix);
        self.scopes.push((prefix.to_string(), entry));
        Ok(self)
    }

    /// Registers a policy for the route registered with exactly `pattern`.
    pub fn action(mut self, pattern: &str, declaration: &PolicyDeclaration) -> Result<Self, CatalogError> {
        let entry = CatalogEntry::from_declaration(pattern, declaration)?;
        self.actions.insert(pattern.to_string(), entry);
        Ok(self)
    }

    fn scope_for(&self, pattern: &str) -> Option<&CatalogEntry> {
        self.scopes
            .iter()
            .filter(|(prefix, _)| {
                pattern.starts_with(prefix.as_str())
                    && (prefix.ends_with('/')
                        || pattern.len() == prefix.len()
                        || pattern[prefix.len()..].starts_with('/'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, entry)| entry)
    }

    /// Entries applying to a route, lowest priority first.
    pub fn applicable(&self, pattern: Option<&str>) -> Vec<(PriorityLevel, &CatalogEntry)> {
        let mut entries = vec![(PriorityLevel::Lowest, &self.global)];
        if let Some(pattern) = pattern {
            if let Some(scope) = self.scope_for(pattern) {
                entries.push((PriorityLevel::Low, scope));
            }
            if let Some(action) = self.actions.get(pattern) {
                entries.push((PriorityLevel::Highest, action));
            }
        }
        entries
    }

    /// Fresh resolver for one response, or `None` when an applicable policy excludes `status`.
    pub fn resolver_for(&self, pattern: Option<&str>, status: u16) -> Option<PolicyResolver> {
        let entries = self.applicable(pattern);
        if entries.iter().any(|(_, entry)| entry.exclude_status.contains(&status)) {
            debug!("Status {} is excluded from cache policies for {:?}", status, pattern);
            return None;
        }

        let mut resolver = PolicyResolver::new();
        for (level, entry) in entries {
            resolver.register(Some(entry.rule.clone()), level);
        }
        Some(resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurable::RequestAttributes;
    use crate::policy::{DirectiveValue, OverrideStrategy};

    fn catalog() -> PolicyCatalog {
        let global = PolicyDeclaration::new()
            .with_directive("maxAge", 600)
            .with_directive("public", true)
            .with_excluded_status(500)
            .with_override_strategy(OverrideStrategy::Merge);
        PolicyCatalog::new(&global)
            .unwrap()
            .scope("/articles", &PolicyDeclaration::new().with_directive("sMaxage", 120))
            .unwrap()
            .scope("/articles/{id}/comments", &PolicyDeclaration::new().with_directive("private", true))
            .unwrap()
            .action("/articles/{id}", &PolicyDeclaration::new().with_directive("maxAge", 60).with_excluded_status(404))
            .unwrap()
    }

    #[test]
    fn test_applicable_levels() {
        let catalog = catalog();

        let levels: Vec<PriorityLevel> = catalog.applicable(Some("/articles/{id}")).into_iter().map(|(level, _)| level).collect();
        assert_eq!(levels, vec![PriorityLevel::Lowest, PriorityLevel::Low, PriorityLevel::Highest]);

        let levels: Vec<PriorityLevel> = catalog.applicable(None).into_iter().map(|(level, _)| level).collect();
        assert_eq!(levels, vec![PriorityLevel::Lowest]);

        assert_eq!(catalog.applicable(Some("/articlesarchive")).len(), 1);
    }

    #[test]
    fn test_longest_scope_wins() {
        let catalog = catalog();
        let entries = catalog.applicable(Some("/articles/{id}/comments/{comment}"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1.rule.directives.get("private"), Some(&DirectiveValue::Flag(true)));
    }

    #[test]
    fn test_resolver_for_resolves_all_levels() {
        let resolver = catalog().resolver_for(Some("/articles/{id}"), 200).unwrap();
        let resolved = resolver.resolve(&RequestAttributes::new()).unwrap();
        assert_eq!(resolved.directives.get("maxAge"), Some(&DirectiveValue::Integer(60)));
        assert_eq!(resolved.directives.get("sMaxage"), Some(&DirectiveValue::Integer(120)));
        assert_eq!(resolved.directives.get("public"), Some(&DirectiveValue::Flag(true)));
    }

    #[test]
    fn test_excluded_status() {
        let catalog = catalog();
        assert!(catalog.resolver_for(Some("/articles/{id}"), 404).is_none());
        assert!(catalog.resolver_for(Some("/articles"), 404).is_some());
        assert!(catalog.resolver_for(None, 500).is_none());
    }

    #[test]
    fn test_invalid_declaration_rejected() {
        let global = PolicyDeclaration::new();
        let result = PolicyCatalog::new(&global)
            .unwrap()
            .action("/broken", &PolicyDeclaration::new().with_override("later", Default::default()));
        match result {
            Err(CatalogError::Declaration { target, .. }) => assert_eq!(target, "/broken"),
            Ok(_) => panic!("invalid period accepted"),
        }
    }
}

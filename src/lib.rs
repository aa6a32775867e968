pub mod catalog;
pub mod config;
pub mod header;
pub mod logging;
pub mod measurable;
pub mod middleware;
pub mod policy;
pub mod resolver;

pub use catalog::PolicyCatalog;
pub use header::CacheHeaders;
pub use measurable::{RequestAttributes, ResolutionContext, TimeMeasurable};
pub use policy::declaration::PolicyDeclaration;
pub use policy::{DirectiveValue, Directives, OverrideStrategy, PolicyRule, PriorityLevel};
pub use resolver::{PolicyResolver, ResolveError};

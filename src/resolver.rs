//! # Dependency Resolver
//!
//! Two independent pieces:
//!
//! - [`validate`] checks a service's declared dependencies against the live registry. Each
//!   dependency is *missing* (unknown to the registry), *unhealthy* (known but not `Healthy` or
//!   `Degraded`), or fine.
//! - [`resolve_order`] is a pure planning utility for batch registration. It never touches the
//!   registry.

use crate::error::{OrchestratorError, ResolveError};
use crate::model::ServiceStatus;
use crate::registry::RegistryClient;
use std::collections::{HashMap, HashSet};

/// Result of checking one service's dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyCheck {
    pub missing: Vec<String>,
    pub unhealthy: Vec<String>,
}

impl DependencyCheck {
    pub fn ok(&self) -> bool {
        self.missing.is_empty() && self.unhealthy.is_empty()
    }

    /// Builds the error recorded when `service` cannot start.
    pub fn into_error(self, service: &str) -> OrchestratorError {
        OrchestratorError::Dependency {
            service: service.to_string(),
            missing: self.missing,
            unhealthy: self.unhealthy,
        }
    }
}

/// Sorts `(name, status)` pairs into missing and unhealthy lists, keeping input order.
pub fn classify(
    statuses: impl IntoIterator<Item = (String, Option<ServiceStatus>)>,
) -> DependencyCheck {
    let mut check = DependencyCheck::default();
    for (name, status) in statuses {
        match status {
            None => check.missing.push(name),
            Some(status) if !status.is_available() => check.unhealthy.push(name),
            Some(_) => {}
        }
    }
    check
}

/// Checks `dependencies` against the registry.
pub(crate) async fn validate(
    registry: &RegistryClient,
    dependencies: &[String],
) -> Result<DependencyCheck, OrchestratorError> {
    if dependencies.is_empty() {
        return Ok(DependencyCheck::default());
    }
    let statuses = registry.statuses(dependencies).await?;
    Ok(classify(statuses))
}

/// Topologically sorts `graph` (name -> dependencies) so every service follows its dependencies.
///
/// Roots are visited in lexical order and dependencies in declaration order, so the result is
/// deterministic.
///
/// ```rust
/// use std::collections::HashMap;
/// use service_orchestrator::resolver::resolve_order;
///
/// let graph = HashMap::from([
///     ("search".to_string(), vec!["db".to_string()]),
///     ("db".to_string(), vec![]),
/// ]);
/// assert_eq!(resolve_order(&graph).unwrap(), vec!["db", "search"]);
/// ```
pub fn resolve_order(graph: &HashMap<String, Vec<String>>) -> Result<Vec<String>, ResolveError> {
    resolve_order_with_known(graph, &HashSet::new())
}

/// Like [`resolve_order`], but dependencies named in `known` count as defined even when absent
/// from `graph` (they are already running). Known names do not appear in the output.
pub fn resolve_order_with_known(
    graph: &HashMap<String, Vec<String>>,
    known: &HashSet<String>,
) -> Result<Vec<String>, ResolveError> {
    let mut roots: Vec<&str> = graph.keys().map(String::as_str).collect();
    roots.sort_unstable();

    let mut planner = Planner {
        graph,
        known,
        marks: HashMap::new(),
        stack: Vec::new(),
        order: Vec::with_capacity(graph.len()),
    };
    for root in roots {
        planner.visit(root)?;
    }
    Ok(planner.order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Planner<'a> {
    graph: &'a HashMap<String, Vec<String>>,
    known: &'a HashSet<String>,
    marks: HashMap<&'a str, Mark>,
    stack: Vec<&'a str>,
    order: Vec<String>,
}

impl<'a> Planner<'a> {
    fn visit(&mut self, node: &'a str) -> Result<(), ResolveError> {
        match self.marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = self
                    .stack
                    .iter()
                    .position(|n| *n == node)
                    .unwrap_or_default();
                let mut path: Vec<String> =
                    self.stack[start..].iter().map(|n| n.to_string()).collect();
                path.push(node.to_string());
                return Err(ResolveError::CyclicDependency { path });
            }
            None => {}
        }

        self.marks.insert(node, Mark::Visiting);
        self.stack.push(node);

        let dependencies = self.graph.get(node).map(Vec::as_slice).unwrap_or_default();
        for dependency in dependencies {
            if !self.graph.contains_key(dependency) {
                if self.known.contains(dependency) {
                    continue;
                }
                return Err(ResolveError::MissingDependency {
                    service: node.to_string(),
                    dependency: dependency.clone(),
                });
            }
            self.visit(dependency)?;
        }

        self.stack.pop();
        self.marks.insert(node, Mark::Done);
        self.order.push(node.to_string());
        Ok(())
    }
}

//! Routes that bypass synchronization and hit a concept directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::ActionRef;
use crate::error::ValidationError;

/// `[engine.passthrough]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughConfig {
    /// Paths of the form `/Concept/action`.
    pub routes: Vec<String>,
}

/// Parses `/Concept/action` into an action reference.
pub fn parse_route(path: &str) -> Result<ActionRef, ValidationError> {
    let malformed = |reason: &str| ValidationError::MalformedPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = path.trim();
    let rest = trimmed
        .strip_prefix('/')
        .ok_or_else(|| malformed("must start with '/'"))?;
    let (concept, action) = rest
        .split_once('/')
        .ok_or_else(|| malformed("expected /Concept/action"))?;
    if concept.is_empty() || action.is_empty() || action.contains('/') {
        return Err(malformed("expected /Concept/action"));
    }
    Ok(ActionRef::new(concept, action))
}

/// Strips `base` from the front of `path`, keeping a leading `/`.
#[must_use]
pub fn strip_base_path(path: &str, base: Option<&str>) -> String {
    let Some(base) = base.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()) else {
        return path.to_string();
    };
    match path.strip_prefix(base) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

/// Resolved passthrough table.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassthroughRoutes {
    routes: BTreeMap<String, ActionRef>,
}

impl PassthroughRoutes {
    pub(crate) fn from_config(config: &PassthroughConfig) -> Result<Self, ValidationError> {
        let mut routes = BTreeMap::new();
        for route in &config.routes {
            let action = parse_route(route)?;
            routes.insert(route.trim().to_string(), action);
        }
        Ok(Self { routes })
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<&ActionRef> {
        self.routes.get(path)
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::Capability;
use crate::models::user::Role;

/// The authenticated user together with their effective permission map,
/// resolved once per request and never cached across requests.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    sections: HashMap<String, HashSet<Capability>>,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            sections: HashMap::new(),
        }
    }

    pub fn with_capabilities(
        mut self,
        section: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        self.sections
            .insert(section.into(), capabilities.into_iter().collect());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Capabilities held for a section; absent sections resolve to the
    /// empty set, not an error.
    pub fn capabilities(&self, section: &str) -> HashSet<Capability> {
        self.sections.get(section).cloned().unwrap_or_default()
    }

    pub fn has_all(&self, section: &str, required: &[Capability]) -> bool {
        match self.sections.get(section) {
            Some(held) => required.iter().all(|cap| held.contains(cap)),
            None => required.is_empty(),
        }
    }

    pub fn sections(&self) -> &HashMap<String, HashSet<Capability>> {
        &self.sections
    }
}

use std::sync::Arc;

/// The enumerated set of sections grants can target. Supplied as
/// configuration so new sections can be added without touching decision
/// code; the decision path itself never enumerates this list.
#[derive(Debug, Clone)]
pub struct SectionRegistry {
    sections: Arc<Vec<String>>,
}

const DEFAULT_SECTIONS: &[&str] = &[
    "tasks",
    "projects",
    "clients",
    "portfolios",
    "blogs",
    "payments",
    "milestones",
    "users",
];

impl SectionRegistry {
    pub fn new(sections: impl IntoIterator<Item = String>) -> Self {
        Self {
            sections: Arc::new(sections.into_iter().collect()),
        }
    }

    /// Reads `OPSDESK_SECTIONS` (comma-separated) or falls back to the
    /// default enumeration.
    pub fn from_env() -> Self {
        match std::env::var("OPSDESK_SECTIONS") {
            Ok(raw) if !raw.trim().is_empty() => Self::new(
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            ),
            _ => Self::default(),
        }
    }

    pub fn contains(&self, section: &str) -> bool {
        self.sections.iter().any(|s| s == section)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(String::as_str)
    }
}

impl Default for SectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SECTIONS.iter().map(|s| s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_core_sections() {
        let registry = SectionRegistry::default();
        assert!(registry.contains("tasks"));
        assert!(registry.contains("users"));
        assert!(registry.contains("payments"));
        assert!(!registry.contains("launch_codes"));
    }

    #[test]
    fn custom_registry_is_exact() {
        let registry = SectionRegistry::new(["blogs".to_string(), "seo".to_string()]);
        assert!(registry.contains("seo"));
        assert!(!registry.contains("tasks"));
        assert_eq!(registry.iter().count(), 2);
    }
}

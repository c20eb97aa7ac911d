//! Access decision engine.
//!
//! Layers, leaf-first:
//! - identity resolution lives in [`crate::jwt`] (bearer extraction);
//! - [`resolver`] combines role + stored grants into a [`Principal`];
//! - [`decision`] is the pure allow/deny function over a principal;
//! - [`ownership`] adds the instance-level policy for tasks;
//! - [`guard`] protects role mutation against losing the last admin.
//!
//! Deny outcomes are values, never panics or exceptions, so every call
//! site handles every case.

pub mod decision;
pub mod guard;
pub mod ownership;
pub mod principal;
pub mod resolver;
pub mod sections;

pub use decision::{decide, Decision, DenyReason};
pub use principal::Principal;
pub use resolver::resolve_principal;
pub use sections::SectionRegistry;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Atomic unit of granted access within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    View,
    Create,
    Edit,
    Delete,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::View,
        Capability::Create,
        Capability::Edit,
        Capability::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Create => "create",
            Capability::Edit => "edit",
            Capability::Delete => "delete",
        }
    }
}

/// Well-known section names. The registry is configuration; these
/// constants exist only for the routes this crate itself serves.
pub mod section {
    pub const TASKS: &str = "tasks";
    pub const USERS: &str = "users";
}

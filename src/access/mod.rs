//! Capability checks against the current operator.
//!
//! `admin` is the superuser role and holds every capability. Every other
//! role is limited to exactly the permissions the backend granted at login:
//! membership in the user's permission list, nothing more.

use crate::session::AdminUser;

/// Role granted every permission unconditionally.
pub const SUPERUSER_ROLE: &str = "admin";

/// Answers capability queries for a given user.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Whether `user` holds `permission`.
    pub fn has_permission(&self, user: &AdminUser, permission: &str) -> bool {
        if user.role == SUPERUSER_ROLE {
            return true;
        }
        user.permissions.iter().any(|p| p == permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role: &str, permissions: &[&str]) -> AdminUser {
        AdminUser {
            id: "u-1".to_string(),
            email: "ops@example.com".to_string(),
            role: role.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            login_time: Utc::now(),
        }
    }

    #[test]
    fn superuser_holds_everything() {
        let evaluator = PermissionEvaluator::new();
        let admin = user("admin", &[]);

        assert!(evaluator.has_permission(&admin, "products.write"));
        assert!(evaluator.has_permission(&admin, "settings.delete"));
        assert!(evaluator.has_permission(&admin, "anything.at.all"));
    }

    #[test]
    fn other_roles_need_explicit_grants() {
        let evaluator = PermissionEvaluator::new();
        let editor = user("editor", &["products.read", "products.write"]);

        assert!(evaluator.has_permission(&editor, "products.read"));
        assert!(evaluator.has_permission(&editor, "products.write"));
        assert!(!evaluator.has_permission(&editor, "users.delete"));
    }

    #[test]
    fn empty_grant_list_denies_all() {
        let evaluator = PermissionEvaluator::new();
        let viewer = user("viewer", &[]);

        assert!(!evaluator.has_permission(&viewer, "products.read"));
    }

    #[test]
    fn role_match_is_exact() {
        let evaluator = PermissionEvaluator::new();
        let not_quite = user("administrator", &[]);

        assert!(!evaluator.has_permission(&not_quite, "products.read"));
    }
}

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capabilities granted by the identity collaborator. Token verification
/// and role augmentation happen outside this crate; by the time a
/// request reaches the core it carries a fully-resolved [`Principal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Gateway,
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.has_role(*role))
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("{name} lacks the {role:?} capability")]
pub struct AccessDenied {
    pub name: String,
    pub role: Role,
}

pub fn require_role(principal: &Principal, role: Role) -> Result<(), AccessDenied> {
    if principal.has_role(role) {
        Ok(())
    } else {
        Err(AccessDenied {
            name: principal.name.clone(),
            role,
        })
    }
}

/// Admins implicitly satisfy a User requirement; the reverse is not true.
pub fn require_user(principal: &Principal) -> Result<(), AccessDenied> {
    if principal.has_any_role(&[Role::User, Role::Admin]) {
        Ok(())
    } else {
        Err(AccessDenied {
            name: principal.name.clone(),
            role: Role::User,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[Role]) -> Principal {
        Principal {
            name: "gw-01".to_string(),
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn gateway_capability_is_checked_exactly() {
        assert!(require_role(&principal(&[Role::Gateway]), Role::Gateway).is_ok());
        assert!(require_role(&principal(&[Role::User]), Role::Gateway).is_err());
        assert!(require_role(&principal(&[]), Role::Gateway).is_err());
    }

    #[test]
    fn admin_satisfies_user_requirement() {
        assert!(require_user(&principal(&[Role::Admin])).is_ok());
        assert!(require_user(&principal(&[Role::User])).is_ok());
        assert!(require_user(&principal(&[Role::Gateway])).is_err());
    }
}

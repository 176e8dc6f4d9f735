//! Access-control lists attached to cached objects.
//!
//! The cache only needs a visibility predicate: does the acting principal
//! hold a given permission on an object? Grant management and the remote's
//! full permission semantics live outside this crate.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An operation an ACL entry can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Update,
    Delete,
    Admin,
}

impl Permission {
    /// All permissions, in declaration order.
    pub const ALL: [Permission; 5] = [
        Permission::Read,
        Permission::Write,
        Permission::Update,
        Permission::Delete,
        Permission::Admin,
    ];
}

/// A grantee in an ACL entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    /// A single user.
    User(String),
    /// Every member of a group.
    Group(String),
    /// Any signed-in user.
    Authenticated,
    /// Anyone, including anonymous callers.
    Anyone,
}

/// The principal on whose behalf a query or mutation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The signed-in user, if any.
    pub user_id: Option<String>,
    /// Groups the user belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Actor {
    /// An anonymous caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A signed-in user with no group memberships.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            groups: Vec::new(),
        }
    }

    /// Add a group membership.
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Whether `principal` names this actor.
    pub fn matches(&self, principal: &Principal) -> bool {
        match principal {
            Principal::Anyone => true,
            Principal::Authenticated => self.user_id.is_some(),
            Principal::User(id) => self.user_id.as_deref() == Some(id.as_str()),
            Principal::Group(id) => self.groups.iter().any(|g| g == id),
        }
    }
}

/// Permission set of one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// The owning user. Owners hold every permission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub read: BTreeSet<Principal>,
    #[serde(default)]
    pub write: BTreeSet<Principal>,
    #[serde(default)]
    pub update: BTreeSet<Principal>,
    #[serde(default)]
    pub delete: BTreeSet<Principal>,
    #[serde(default)]
    pub admin: BTreeSet<Principal>,
}

impl Acl {
    /// An ACL that grants every permission to anyone.
    pub fn public() -> Self {
        let mut acl = Self::default();
        for permission in Permission::ALL {
            acl.grant(permission, Principal::Anyone);
        }
        acl
    }

    /// An ACL owned by `user_id` with no further grants.
    pub fn owned_by(user_id: impl Into<String>) -> Self {
        Self {
            owner: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Grantees of `permission`.
    pub fn grantees(&self, permission: Permission) -> &BTreeSet<Principal> {
        match permission {
            Permission::Read => &self.read,
            Permission::Write => &self.write,
            Permission::Update => &self.update,
            Permission::Delete => &self.delete,
            Permission::Admin => &self.admin,
        }
    }

    fn grantees_mut(&mut self, permission: Permission) -> &mut BTreeSet<Principal> {
        match permission {
            Permission::Read => &mut self.read,
            Permission::Write => &mut self.write,
            Permission::Update => &mut self.update,
            Permission::Delete => &mut self.delete,
            Permission::Admin => &mut self.admin,
        }
    }

    /// Grant `permission` to `principal`.
    pub fn grant(&mut self, permission: Permission, principal: Principal) {
        self.grantees_mut(permission).insert(principal);
    }

    /// Builder form of [`Acl::grant`].
    pub fn with(mut self, permission: Permission, principal: Principal) -> Self {
        self.grant(permission, principal);
        self
    }

    /// Remove a grant. Returns whether it was present.
    pub fn revoke(&mut self, permission: Permission, principal: &Principal) -> bool {
        self.grantees_mut(permission).remove(principal)
    }

    /// Whether `actor` holds `permission`.
    ///
    /// The owner holds every permission. `Write` implies `Update` and
    /// `Delete`. `Admin` only governs changes to the ACL itself.
    pub fn allows(&self, actor: &Actor, permission: Permission) -> bool {
        if let (Some(owner), Some(user)) = (&self.owner, &actor.user_id) {
            if owner == user {
                return true;
            }
        }

        let granted = |p: Permission| self.grantees(p).iter().any(|g| actor.matches(g));

        granted(permission)
            || (matches!(permission, Permission::Update | Permission::Delete)
                && granted(Permission::Write))
    }
}

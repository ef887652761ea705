//! The access and visibility decisions.
//!
//! Two independent predicates live here:
//!
//! - [`VisibilityResolver::allowed`]: may `actor` perform an action guarded
//!   by a permission, optionally on a target person;
//! - [`VisibilityResolver::person_visible`]: may `viewer` see `subject` in a
//!   listing or search at all.
//!
//! Neither ever returns an error. Missing actors, unknown permission names,
//! and failures of the store or the membership provider all deny.

use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
  acl::{Permission, PermissionChecker},
  membership::{MembershipProvider, ProjectId, RoleVisibility},
  person::Person,
  principal::PrincipalId,
  store::DirectoryStore,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Directory-wide visibility settings, fixed at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityConfig {
  /// Every active, non-anonymous user may view people.
  #[serde(default)]
  pub directory_visibility:    bool,
  /// Applied to principals holding no project membership at all.
  #[serde(default)]
  pub default_role_visibility: RoleVisibility,
}

impl VisibilityConfig {
  /// Build from the legacy numeric setting, where any value above zero
  /// enables directory-wide visibility.
  pub fn from_threshold(threshold: i64) -> Self {
    Self {
      directory_visibility: threshold > 0,
      ..Self::default()
    }
  }
}

// ─── Person scope ────────────────────────────────────────────────────────────

/// The set of people a viewer may see, resolved once per viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonScope {
  /// No viewer: nothing is visible.
  Nobody,
  Everyone,
  /// The viewer itself, plus people sharing one of `projects` with it.
  Restricted {
    viewer:   PrincipalId,
    projects: BTreeSet<ProjectId>,
  },
}

// ─── Resolver ────────────────────────────────────────────────────────────────

pub struct VisibilityResolver<S, M> {
  store:       Arc<S>,
  memberships: Arc<M>,
  config:      VisibilityConfig,
}

impl<S, M> Clone for VisibilityResolver<S, M> {
  fn clone(&self) -> Self {
    Self {
      store:       Arc::clone(&self.store),
      memberships: Arc::clone(&self.memberships),
      config:      self.config.clone(),
    }
  }
}

impl<S, M> VisibilityResolver<S, M>
where
  S: DirectoryStore,
  M: MembershipProvider,
{
  pub fn new(store: Arc<S>, memberships: Arc<M>, config: VisibilityConfig) -> Self {
    Self { store, memberships, config }
  }

  pub fn config(&self) -> &VisibilityConfig { &self.config }

  /// Union of the grants held by `actor` and every group it belongs to.
  /// A store failure yields the empty set.
  pub async fn granted_to(&self, actor: &Person) -> BTreeSet<Permission> {
    match self.store.permissions_for_any(actor.grant_holders()).await {
      Ok(set) => set,
      Err(e) => {
        warn!(actor = actor.id, error = %e, "permission lookup failed; denying");
        BTreeSet::new()
      }
    }
  }

  /// Is `actor` allowed `permission`, optionally on `target`?
  pub async fn allowed(
    &self,
    actor: Option<&Person>,
    permission: Permission,
    target: Option<&Person>,
  ) -> bool {
    let Some(actor) = actor else {
      return false;
    };
    if actor.admin {
      return true;
    }
    let granted = self.granted_to(actor).await;
    actor.allowed_people_to(permission, target, &granted, &self.config)
  }

  /// [`Self::allowed`] for a permission given by name. Administrators pass
  /// before the name is looked at; for everyone else a name outside the
  /// enumerated set is denied.
  pub async fn allowed_by_name(
    &self,
    actor: Option<&Person>,
    permission: &str,
    target: Option<&Person>,
  ) -> bool {
    let Some(actor) = actor else {
      return false;
    };
    if actor.admin {
      return true;
    }
    match Permission::parse(permission) {
      Ok(permission) => self.allowed(Some(actor), permission, target).await,
      Err(_) => false,
    }
  }

  /// Resolve which people `viewer` may see.
  pub async fn person_scope(&self, viewer: Option<&Person>) -> PersonScope {
    let Some(viewer) = viewer else {
      return PersonScope::Nobody;
    };
    if viewer.admin {
      return PersonScope::Everyone;
    }
    let self_only = PersonScope::Restricted {
      viewer:   viewer.id,
      projects: BTreeSet::new(),
    };

    let memberships = match self.memberships.memberships_of(viewer.id).await {
      Ok(m) => m,
      Err(e) => {
        warn!(viewer = viewer.id, error = %e, "membership lookup failed; restricting to self");
        return self_only;
      }
    };

    if memberships.is_empty() {
      return match self.config.default_role_visibility {
        RoleVisibility::All => PersonScope::Everyone,
        RoleVisibility::MembersOfVisibleProjects => self_only,
      };
    }

    let roles: BTreeSet<_> = memberships.iter().map(|m| m.role_id).collect();
    for role in roles {
      match self.memberships.role_visibility(role).await {
        Ok(RoleVisibility::All) => return PersonScope::Everyone,
        Ok(RoleVisibility::MembersOfVisibleProjects) => {}
        Err(e) => {
          warn!(viewer = viewer.id, role, error = %e, "role lookup failed; treating as restricted");
        }
      }
    }

    PersonScope::Restricted {
      viewer:   viewer.id,
      projects: memberships.into_iter().map(|m| m.project_id).collect(),
    }
  }

  /// Does `scope` admit `subject`?
  pub async fn admits(&self, scope: &PersonScope, subject: &Person) -> bool {
    match scope {
      PersonScope::Nobody => false,
      PersonScope::Everyone => true,
      PersonScope::Restricted { viewer, projects } => {
        if *viewer == subject.id {
          return true;
        }
        if projects.is_empty() {
          return false;
        }
        match self.memberships.shared_projects(*viewer, subject.id).await {
          Ok(shared) => shared.iter().any(|p| projects.contains(p)),
          Err(e) => {
            warn!(viewer, subject = subject.id, error = %e, "shared project lookup failed; hiding");
            false
          }
        }
      }
    }
  }

  /// May `viewer` see `subject` in listings and search results?
  pub async fn person_visible(&self, viewer: Option<&Person>, subject: &Person) -> bool {
    if let Some(v) = viewer
      && v.id == subject.id
    {
      return true;
    }
    let scope = self.person_scope(viewer).await;
    self.admits(&scope, subject).await
  }
}

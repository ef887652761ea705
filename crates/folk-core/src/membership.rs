//! The project/role/membership collaborator.
//!
//! The directory does not own projects or roles; it only asks which projects
//! two principals share and how far a role lets its holder see.
//! [`StaticMemberships`] is a fixed, in-memory provider for configuration-
//! driven deployments and tests.

use std::{
  collections::{BTreeMap, BTreeSet},
  future::Future,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Error, principal::PrincipalId};

pub type ProjectId = i64;
pub type RoleId = i64;

/// How much of the directory a role's holders may see.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
  Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoleVisibility {
  /// Every person in the directory.
  #[default]
  All,
  /// Only people sharing a project with the holder.
  MembersOfVisibleProjects,
}

/// One role held by a principal in one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
  pub project_id: ProjectId,
  pub role_id:    RoleId,
}

/// Read access to an external project/membership system.
pub trait MembershipProvider: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Every `(project, role)` pair held by `principal`.
  fn memberships_of(
    &self,
    principal: PrincipalId,
  ) -> impl Future<Output = Result<Vec<Membership>, Self::Error>> + Send + '_;

  /// Projects both principals are members of.
  fn shared_projects(
    &self,
    a: PrincipalId,
    b: PrincipalId,
  ) -> impl Future<Output = Result<BTreeSet<ProjectId>, Self::Error>> + Send + '_;

  fn role_visibility(
    &self,
    role: RoleId,
  ) -> impl Future<Output = Result<RoleVisibility, Self::Error>> + Send + '_;
}

// ─── Static provider ─────────────────────────────────────────────────────────

/// A fixed membership table.
#[derive(Debug, Clone, Default)]
pub struct StaticMemberships {
  roles:   BTreeMap<RoleId, RoleVisibility>,
  members: Vec<(PrincipalId, Membership)>,
}

impl StaticMemberships {
  pub fn new() -> Self { Self::default() }

  pub fn with_role(mut self, role: RoleId, visibility: RoleVisibility) -> Self {
    self.roles.insert(role, visibility);
    self
  }

  pub fn with_member(
    mut self,
    principal: PrincipalId,
    project_id: ProjectId,
    role_id: RoleId,
  ) -> Self {
    self.add_member(principal, project_id, role_id);
    self
  }

  pub fn add_member(
    &mut self,
    principal: PrincipalId,
    project_id: ProjectId,
    role_id: RoleId,
  ) {
    let membership = Membership { project_id, role_id };
    if !self.members.contains(&(principal, membership)) {
      self.members.push((principal, membership));
    }
  }

  fn projects_of(&self, principal: PrincipalId) -> BTreeSet<ProjectId> {
    self
      .members
      .iter()
      .filter(|(p, _)| *p == principal)
      .map(|(_, m)| m.project_id)
      .collect()
  }
}

impl MembershipProvider for StaticMemberships {
  type Error = Error;

  async fn memberships_of(
    &self,
    principal: PrincipalId,
  ) -> Result<Vec<Membership>, Error> {
    Ok(
      self
        .members
        .iter()
        .filter(|(p, _)| *p == principal)
        .map(|(_, m)| *m)
        .collect(),
    )
  }

  async fn shared_projects(
    &self,
    a: PrincipalId,
    b: PrincipalId,
  ) -> Result<BTreeSet<ProjectId>, Error> {
    let theirs = self.projects_of(b);
    Ok(
      self
        .projects_of(a)
        .into_iter()
        .filter(|p| theirs.contains(p))
        .collect(),
    )
  }

  async fn role_visibility(&self, role: RoleId) -> Result<RoleVisibility, Error> {
    self.roles.get(&role).copied().ok_or(Error::RoleNotFound(role))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn shared_projects_intersects_memberships() {
    let provider = StaticMemberships::new()
      .with_role(1, RoleVisibility::MembersOfVisibleProjects)
      .with_member(2, 10, 1)
      .with_member(2, 11, 1)
      .with_member(3, 11, 1)
      .with_member(3, 12, 1);

    assert_eq!(
      provider.shared_projects(2, 3).await.unwrap(),
      BTreeSet::from([11])
    );
    assert!(provider.shared_projects(2, 4).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn unknown_role_is_an_error() {
    let provider = StaticMemberships::new();
    assert!(matches!(
      provider.role_visibility(7).await,
      Err(Error::RoleNotFound(7))
    ));
  }
}

//! Permissions, ACL entries, and the action → permission mapping.
//!
//! The permission set is closed: every grant names one [`Permission`]
//! variant. Names coming from callers are parsed with [`Permission::parse`],
//! which rejects anything outside the set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::{
  Error, Result,
  person::Person,
  principal::{PrincipalId, PrincipalSummary},
  visibility::VisibilityConfig,
};

pub type AclEntryId = i64;

// ─── Permission ──────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Permission {
  ViewPeople,
  EditPeople,
  AddPeople,
  DeletePeople,
  EditDepartments,
  DeleteDepartments,
  ManageTags,
  ManagePublicPeopleQueries,
}

impl Permission {
  /// Parse a permission name, rejecting names outside the enumerated set.
  pub fn parse(name: &str) -> Result<Self> {
    name
      .trim()
      .parse()
      .map_err(|_| Error::UnknownPermission(name.to_owned()))
  }

  /// The complete enumerated permission list.
  pub fn all() -> impl Iterator<Item = Self> { Self::iter() }
}

/// Parse every name, failing on the first unknown one. The result is sorted
/// and free of duplicates.
pub fn parse_permissions<I, S>(names: I) -> Result<Vec<Permission>>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let set = names
    .into_iter()
    .map(|n| Permission::parse(n.as_ref()))
    .collect::<Result<BTreeSet<_>>>()?;
  Ok(set.into_iter().collect())
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A single `(principal, permission)` grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
  pub id:           AclEntryId,
  pub principal_id: PrincipalId,
  pub permission:   Permission,
}

/// All grants held by one principal, for administrative listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalGrants {
  pub principal: PrincipalSummary,
  pub entries:   Vec<AclEntry>,
}

impl PrincipalGrants {
  pub fn permissions(&self) -> BTreeSet<Permission> {
    self.entries.iter().map(|e| e.permission).collect()
  }
}

// ─── Actions ─────────────────────────────────────────────────────────────────

/// Every gated operation of the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
  ListPeople,
  ShowPerson,
  NewPerson,
  CreatePerson,
  EditPerson,
  UpdatePerson,
  DestroyPerson,
  EditDepartment,
  DestroyDepartment,
  ManageTags,
  ManagePublicQueries,
}

impl Action {
  pub fn required_permission(self) -> Permission {
    match self {
      Self::ListPeople | Self::ShowPerson => Permission::ViewPeople,
      Self::NewPerson | Self::CreatePerson => Permission::AddPeople,
      Self::EditPerson | Self::UpdatePerson => Permission::EditPeople,
      Self::DestroyPerson => Permission::DeletePeople,
      Self::EditDepartment => Permission::EditDepartments,
      Self::DestroyDepartment => Permission::DeleteDepartments,
      Self::ManageTags => Permission::ManageTags,
      Self::ManagePublicQueries => Permission::ManagePublicPeopleQueries,
    }
  }
}

// ─── Checker ─────────────────────────────────────────────────────────────────

/// The permission decision for an acting principal, given the grants held by
/// the principal and every group it belongs to.
pub trait PermissionChecker {
  /// The principals whose grants this actor inherits, itself included.
  fn grant_holders(&self) -> Vec<PrincipalId>;

  fn allowed_people_to(
    &self,
    permission: Permission,
    target: Option<&Person>,
    granted: &BTreeSet<Permission>,
    config: &VisibilityConfig,
  ) -> bool;
}

impl PermissionChecker for Person {
  fn grant_holders(&self) -> Vec<PrincipalId> {
    let mut ids = Vec::with_capacity(self.group_ids.len() + 1);
    ids.push(self.id);
    ids.extend(self.group_ids.iter().copied());
    ids
  }

  fn allowed_people_to(
    &self,
    permission: Permission,
    target: Option<&Person>,
    granted: &BTreeSet<Permission>,
    config: &VisibilityConfig,
  ) -> bool {
    if self.admin {
      return true;
    }
    if let Some(target) = target
      && target.id == self.id
      && matches!(permission, Permission::ViewPeople | Permission::EditPeople)
    {
      return true;
    }
    if permission == Permission::ViewPeople
      && self.is_active()
      && !self.is_anonymous()
      && config.directory_visibility
    {
      return true;
    }
    granted.contains(&permission)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{person::tests::person, principal::UserStatus};

  fn config(directory_visibility: bool) -> VisibilityConfig {
    VisibilityConfig {
      directory_visibility,
      ..VisibilityConfig::default()
    }
  }

  #[test]
  fn parse_rejects_unknown_names() {
    assert_eq!(Permission::parse("edit_people").unwrap(), Permission::EditPeople);
    assert!(matches!(
      Permission::parse("launch_rockets"),
      Err(Error::UnknownPermission(name)) if name == "launch_rockets"
    ));
    assert!(parse_permissions(["view_people", "nope"]).is_err());
  }

  #[test]
  fn parse_permissions_dedups() {
    let perms =
      parse_permissions(["manage_tags", "view_people", "manage_tags"]).unwrap();
    assert_eq!(perms, vec![Permission::ViewPeople, Permission::ManageTags]);
  }

  #[test]
  fn permission_list_is_complete() {
    let names: Vec<String> = Permission::all().map(|p| p.to_string()).collect();
    assert_eq!(names, vec![
      "view_people",
      "edit_people",
      "add_people",
      "delete_people",
      "edit_departments",
      "delete_departments",
      "manage_tags",
      "manage_public_people_queries",
    ]);
  }

  #[test]
  fn admin_is_always_allowed() {
    let mut admin = person(1, "Redmine", "Admin");
    admin.admin = true;
    assert!(admin.allowed_people_to(
      Permission::DeleteDepartments,
      None,
      &BTreeSet::new(),
      &config(false),
    ));
  }

  #[test]
  fn self_access_covers_view_and_edit_only() {
    let me = person(4, "Robert", "Hill");
    let none = BTreeSet::new();
    assert!(me.allowed_people_to(Permission::ViewPeople, Some(&me), &none, &config(false)));
    assert!(me.allowed_people_to(Permission::EditPeople, Some(&me), &none, &config(false)));
    assert!(!me.allowed_people_to(Permission::DeletePeople, Some(&me), &none, &config(false)));
    assert!(!me.allowed_people_to(Permission::EditPeople, None, &none, &config(false)));
  }

  #[test]
  fn global_visibility_needs_an_active_user() {
    let mut me = person(2, "John", "Smith");
    let none = BTreeSet::new();
    assert!(me.allowed_people_to(Permission::ViewPeople, None, &none, &config(true)));
    assert!(!me.allowed_people_to(Permission::EditPeople, None, &none, &config(true)));

    me.status = UserStatus::Locked;
    assert!(!me.allowed_people_to(Permission::ViewPeople, None, &none, &config(true)));
    me.status = UserStatus::Anonymous;
    assert!(!me.allowed_people_to(Permission::ViewPeople, None, &none, &config(true)));
  }

  #[test]
  fn grants_decide_when_no_shortcut_applies() {
    let me = person(2, "John", "Smith");
    let other = person(3, "Dave", "Lopper");
    let granted = BTreeSet::from([Permission::EditPeople]);
    assert!(me.allowed_people_to(Permission::EditPeople, Some(&other), &granted, &config(false)));
    assert!(!me.allowed_people_to(Permission::AddPeople, Some(&other), &granted, &config(false)));
  }

  #[test]
  fn grant_holders_include_groups() {
    let mut me = person(2, "John", "Smith");
    me.group_ids = vec![10, 11];
    assert_eq!(me.grant_holders(), vec![2, 10, 11]);
  }

  #[test]
  fn every_action_maps_to_a_permission() {
    assert_eq!(Action::UpdatePerson.required_permission(), Permission::EditPeople);
    assert_eq!(Action::ShowPerson.required_permission(), Permission::ViewPeople);
    assert_eq!(Action::CreatePerson.required_permission(), Permission::AddPeople);
    assert_eq!(
      Action::ManagePublicQueries.required_permission(),
      Permission::ManagePublicPeopleQueries
    );
  }
}

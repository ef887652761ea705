//! The `DirectoryStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `folk-store-sqlite`).
//! The resolver, the query engine and the [`crate::directory::Directory`]
//! service depend on this abstraction, not on any concrete backend.
//!
//! Backends own the department bounds: every structural department write
//! must load, edit and renumber the tree through [`DepartmentTree`] and
//! persist the result in a single transaction.

use std::{collections::BTreeSet, future::Future};

use crate::{
  acl::{AclEntry, AclEntryId, Permission, PrincipalGrants},
  department::{DepartmentId, DepartmentRecord, DepartmentTree},
  person::{NewPerson, Person},
  principal::{Group, Principal, PrincipalId},
  query::{QueryId, QuerySpec, SavedQuery},
};

/// Abstraction over a directory backend.
///
/// Errors convert into [`crate::Error`] so that structural and validation
/// errors raised inside the store reach callers unchanged.
pub trait DirectoryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  // ── Departments ───────────────────────────────────────────────────────

  /// Insert a department under `parent_id` (a new root for `None`).
  fn insert_department(
    &self,
    name: String,
    parent_id: Option<DepartmentId>,
  ) -> impl Future<Output = Result<DepartmentRecord, Self::Error>> + Send + '_;

  /// Reparent a department. Fails with [`crate::Error::Cycle`] when
  /// `new_parent` lies inside the moved subtree.
  fn move_department(
    &self,
    id: DepartmentId,
    new_parent: Option<DepartmentId>,
  ) -> impl Future<Output = Result<DepartmentRecord, Self::Error>> + Send + '_;

  fn rename_department(
    &self,
    id: DepartmentId,
    name: String,
  ) -> impl Future<Output = Result<DepartmentRecord, Self::Error>> + Send + '_;

  /// Delete a childless department; its people become unassigned.
  fn delete_department(
    &self,
    id: DepartmentId,
  ) -> impl Future<Output = Result<DepartmentRecord, Self::Error>> + Send + '_;

  fn get_department(
    &self,
    id: DepartmentId,
  ) -> impl Future<Output = Result<Option<DepartmentRecord>, Self::Error>> + Send + '_;

  /// Snapshot of the whole department forest.
  fn department_tree(
    &self,
  ) -> impl Future<Output = Result<DepartmentTree, Self::Error>> + Send + '_;

  // ── People and groups ─────────────────────────────────────────────────

  fn add_person(
    &self,
    input: NewPerson,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  fn get_person(
    &self,
    id: PrincipalId,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  fn find_person_by_login(
    &self,
    login: String,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  /// Every person, in id order.
  fn list_people(
    &self,
  ) -> impl Future<Output = Result<Vec<Person>, Self::Error>> + Send + '_;

  /// Persist every mutable column of `person`. Group membership is not
  /// written here.
  fn save_person(
    &self,
    person: Person,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  /// Delete a person together with their directory information, group
  /// memberships and ACL entries.
  fn delete_person(
    &self,
    id: PrincipalId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn add_group(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Group, Self::Error>> + Send + '_;

  fn list_groups(
    &self,
  ) -> impl Future<Output = Result<Vec<Group>, Self::Error>> + Send + '_;

  fn add_group_member(
    &self,
    group_id: PrincipalId,
    user_id: PrincipalId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn remove_group_member(
    &self,
    group_id: PrincipalId,
    user_id: PrincipalId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_principal(
    &self,
    id: PrincipalId,
  ) -> impl Future<Output = Result<Option<Principal>, Self::Error>> + Send + '_;

  // ── Access control ────────────────────────────────────────────────────

  /// Grant every named permission to `principal_id`.
  ///
  /// All names are validated before anything is written; one unknown name
  /// fails the whole call with [`crate::Error::UnknownPermission`]. Granting
  /// an existing pair is a no-op. Returns the principal's entries for the
  /// requested permissions.
  fn grant(
    &self,
    principal_id: PrincipalId,
    permissions: Vec<String>,
  ) -> impl Future<Output = Result<Vec<AclEntry>, Self::Error>> + Send + '_;

  /// Remove one entry. Removing an absent entry is not an error.
  fn revoke(
    &self,
    entry_id: AclEntryId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn permissions_for(
    &self,
    principal_id: PrincipalId,
  ) -> impl Future<Output = Result<BTreeSet<Permission>, Self::Error>> + Send + '_;

  /// Union of the permissions held by any of `principal_ids`.
  fn permissions_for_any(
    &self,
    principal_ids: Vec<PrincipalId>,
  ) -> impl Future<Output = Result<BTreeSet<Permission>, Self::Error>> + Send + '_;

  /// Every principal holding at least one grant, ordered by principal kind
  /// (groups first) and then display name.
  fn all_grants(
    &self,
  ) -> impl Future<Output = Result<Vec<PrincipalGrants>, Self::Error>> + Send + '_;

  // ── Saved queries ─────────────────────────────────────────────────────

  fn save_query(
    &self,
    owner_id: PrincipalId,
    spec: QuerySpec,
  ) -> impl Future<Output = Result<SavedQuery, Self::Error>> + Send + '_;

  fn update_query(
    &self,
    id: QueryId,
    spec: QuerySpec,
  ) -> impl Future<Output = Result<SavedQuery, Self::Error>> + Send + '_;

  fn get_query(
    &self,
    id: QueryId,
  ) -> impl Future<Output = Result<Option<SavedQuery>, Self::Error>> + Send + '_;

  fn list_queries(
    &self,
  ) -> impl Future<Output = Result<Vec<SavedQuery>, Self::Error>> + Send + '_;

  fn delete_query(
    &self,
    id: QueryId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

//! The `Directory` service: every directory operation, gated by permission.
//!
//! The store trusts its callers; this layer is where the ACL, the
//! self-editable/privileged field split and the visibility scope are
//! enforced. Denials surface as [`Error::Unauthorized`].

use std::{collections::BTreeSet, sync::Arc};

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  acl::{AclEntry, AclEntryId, Action, Permission, PrincipalGrants},
  department::{DepartmentId, DepartmentRecord, DepartmentTree},
  engine::{QueryCount, QueryEngine},
  filter::FieldRegistry,
  membership::MembershipProvider,
  person::{FieldAccess, NewPerson, Person, PersonField, PersonUpdate, UpdateOutcome},
  principal::{Group, PrincipalId},
  query::{FilterClause, QueryId, QuerySpec, SavedQuery},
  store::DirectoryStore,
  visibility::{VisibilityConfig, VisibilityResolver},
};

/// One page of a people listing.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
  pub count:   QueryCount,
  pub columns: Vec<String>,
  /// Rows projected onto `columns`, each with its `id`.
  pub rows:    Vec<Map<String, Json>>,
}

/// An upcoming birthday.
#[derive(Debug, Clone, Serialize)]
pub struct Birthday {
  pub person: Person,
  pub date:   NaiveDate,
  /// Age reached on `date`.
  pub age:    Option<u32>,
}

pub struct Directory<S, M> {
  store:    Arc<S>,
  resolver: VisibilityResolver<S, M>,
  engine:   QueryEngine<S, M>,
}

impl<S, M> Clone for Directory<S, M> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      resolver: self.resolver.clone(),
      engine:   self.engine.clone(),
    }
  }
}

impl<S, M> Directory<S, M>
where
  S: DirectoryStore,
  M: MembershipProvider,
{
  pub fn new(
    store: Arc<S>,
    memberships: Arc<M>,
    config: VisibilityConfig,
    registry: FieldRegistry,
  ) -> Self {
    let resolver = VisibilityResolver::new(Arc::clone(&store), memberships, config);
    let engine = QueryEngine::new(Arc::clone(&store), resolver.clone(), registry);
    Self { store, resolver, engine }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn resolver(&self) -> &VisibilityResolver<S, M> { &self.resolver }

  pub fn engine(&self) -> &QueryEngine<S, M> { &self.engine }

  // ── Gates ─────────────────────────────────────────────────────────────

  /// Fail with [`Error::Unauthorized`] unless `actor` may perform `action`.
  pub async fn authorize(
    &self,
    actor: Option<&Person>,
    action: Action,
    target: Option<&Person>,
  ) -> Result<()> {
    let permission = action.required_permission();
    if self.resolver.allowed(actor, permission, target).await {
      Ok(())
    } else {
      debug!(
        actor = actor.map(|a| a.id),
        ?action,
        target = target.map(|t| t.id),
        "denied"
      );
      Err(Error::Unauthorized)
    }
  }

  fn require_admin<'a>(&self, actor: Option<&'a Person>) -> Result<&'a Person> {
    match actor {
      Some(a) if a.admin => Ok(a),
      _ => Err(Error::Unauthorized),
    }
  }

  async fn person(&self, id: PrincipalId) -> Result<Person> {
    self
      .store
      .get_person(id)
      .await
      .map_err(Error::from_store)?
      .ok_or(Error::PrincipalNotFound(id))
  }

  /// Load `id` for `action`. An actor without the permission learns
  /// nothing about whether the person exists.
  async fn person_for(
    &self,
    actor: Option<&Person>,
    action: Action,
    id: PrincipalId,
  ) -> Result<Person> {
    match self.store.get_person(id).await.map_err(Error::from_store)? {
      Some(person) => {
        self.authorize(actor, action, Some(&person)).await?;
        Ok(person)
      }
      None => {
        self.authorize(actor, action, None).await?;
        Err(Error::PrincipalNotFound(id))
      }
    }
  }

  async fn require_department(&self, id: DepartmentId) -> Result<DepartmentRecord> {
    self
      .store
      .get_department(id)
      .await
      .map_err(Error::from_store)?
      .ok_or(Error::DepartmentNotFound(id))
  }

  /// Everyone `actor` may see, in id order.
  async fn visible_people(&self, actor: Option<&Person>) -> Result<Vec<Person>> {
    let scope = self.resolver.person_scope(actor).await;
    let people = self.store.list_people().await.map_err(Error::from_store)?;
    let mut out = Vec::new();
    for person in people {
      if self.resolver.admits(&scope, &person).await {
        out.push(person);
      }
    }
    Ok(out)
  }

  // ── People ────────────────────────────────────────────────────────────

  pub async fn show_person(&self, actor: Option<&Person>, id: PrincipalId) -> Result<Person> {
    let person = self.person_for(actor, Action::ShowPerson, id).await?;
    if !self.resolver.person_visible(actor, &person).await {
      return Err(Error::Unauthorized);
    }
    Ok(person)
  }

  /// Create a person. The admin flag and tags are dropped unless the actor
  /// may set them.
  pub async fn create_person(&self, actor: Option<&Person>, mut input: NewPerson) -> Result<Person> {
    self.authorize(actor, Action::CreatePerson, None).await?;
    input.validate()?;

    if input.admin && !actor.is_some_and(|a| a.admin) {
      debug!(login = %input.login, "admin flag ignored");
      input.admin = false;
    }
    if !input.tags.is_empty() && !self.resolver.allowed(actor, Permission::ManageTags, None).await {
      debug!(login = %input.login, "tags ignored");
      input.tags.clear();
    }
    if let Some(department) = input.department_id {
      self.require_department(department).await?;
    }

    let person = self.store.add_person(input).await.map_err(Error::from_store)?;
    info!(id = person.id, login = %person.login, "person created");
    Ok(person)
  }

  /// Apply `update` to person `id`.
  ///
  /// Owners may always write their self-editable fields. Privileged fields
  /// need an explicit `edit_people` grant, the admin flag needs an
  /// administrator and tags need `manage_tags`. Fields the actor may not
  /// write are skipped and listed in the returned outcome.
  pub async fn update_person(
    &self,
    actor: Option<&Person>,
    id: PrincipalId,
    update: PersonUpdate,
  ) -> Result<(Person, UpdateOutcome)> {
    let editor = actor.ok_or(Error::Unauthorized)?;
    let mut person = self.person_for(actor, Action::UpdatePerson, id).await?;

    let privileged = self.resolver.allowed(actor, Permission::EditPeople, None).await;
    let tags = self.resolver.allowed(actor, Permission::ManageTags, None).await;
    let status_locked = editor.id == person.id || (person.admin && !editor.admin);

    if privileged
      && let Some(Some(department)) = update.department_id
    {
      self.require_department(department).await?;
    }

    let outcome = update.apply_to(&mut person, |field| match field.access() {
      FieldAccess::SelfEditable => true,
      FieldAccess::Privileged if field == PersonField::Status => privileged && !status_locked,
      FieldAccess::Privileged => privileged,
      FieldAccess::AdminOnly => editor.admin,
      FieldAccess::Tags => tags,
    });
    if !outcome.ignored.is_empty() {
      debug!(editor = editor.id, person = id, ignored = ?outcome.ignored, "fields ignored");
    }
    if outcome.is_noop() {
      return Ok((person, outcome));
    }

    let person = self.store.save_person(person).await.map_err(Error::from_store)?;
    info!(editor = editor.id, person = id, applied = ?outcome.applied, "person updated");
    Ok((person, outcome))
  }

  pub async fn delete_person(&self, actor: Option<&Person>, id: PrincipalId) -> Result<()> {
    let person = self.person_for(actor, Action::DestroyPerson, id).await?;
    self.store.delete_person(id).await.map_err(Error::from_store)?;
    info!(id, login = %person.login, "person deleted");
    Ok(())
  }

  // ── Departments ───────────────────────────────────────────────────────

  pub async fn department_tree(&self, actor: Option<&Person>) -> Result<DepartmentTree> {
    self.authorize(actor, Action::ListPeople, None).await?;
    self.store.department_tree().await.map_err(Error::from_store)
  }

  /// `id` and its descendants, in tree order.
  pub async fn subtree(
    &self,
    actor: Option<&Person>,
    id: DepartmentId,
  ) -> Result<Vec<DepartmentRecord>> {
    self.department_tree(actor).await?.subtree(id)
  }

  /// Departments `id` may be moved under.
  pub async fn allowed_parents(
    &self,
    actor: Option<&Person>,
    id: DepartmentId,
  ) -> Result<Vec<DepartmentRecord>> {
    self.authorize(actor, Action::EditDepartment, None).await?;
    let tree = self.store.department_tree().await.map_err(Error::from_store)?;
    tree.allowed_parents(id)
  }

  pub async fn add_department(
    &self,
    actor: Option<&Person>,
    name: &str,
    parent_id: Option<DepartmentId>,
  ) -> Result<DepartmentRecord> {
    self.authorize(actor, Action::EditDepartment, None).await?;
    let name = department_name(name)?;
    self.store.insert_department(name, parent_id).await.map_err(Error::from_store)
  }

  pub async fn move_department(
    &self,
    actor: Option<&Person>,
    id: DepartmentId,
    new_parent: Option<DepartmentId>,
  ) -> Result<DepartmentRecord> {
    self.authorize(actor, Action::EditDepartment, None).await?;
    self.store.move_department(id, new_parent).await.map_err(Error::from_store)
  }

  pub async fn rename_department(
    &self,
    actor: Option<&Person>,
    id: DepartmentId,
    name: &str,
  ) -> Result<DepartmentRecord> {
    self.authorize(actor, Action::EditDepartment, None).await?;
    let name = department_name(name)?;
    self.store.rename_department(id, name).await.map_err(Error::from_store)
  }

  pub async fn delete_department(
    &self,
    actor: Option<&Person>,
    id: DepartmentId,
  ) -> Result<DepartmentRecord> {
    self.authorize(actor, Action::DestroyDepartment, None).await?;
    self.store.delete_department(id).await.map_err(Error::from_store)
  }

  pub async fn add_person_to_department(
    &self,
    actor: Option<&Person>,
    department_id: DepartmentId,
    person_id: PrincipalId,
  ) -> Result<Person> {
    self.authorize(actor, Action::EditDepartment, None).await?;
    self.require_department(department_id).await?;
    let mut person = self.person(person_id).await?;
    person.department_id = Some(department_id);
    self.store.save_person(person).await.map_err(Error::from_store)
  }

  /// Unassign `person_id` if it belongs to `department_id`; otherwise a
  /// no-op.
  pub async fn remove_person_from_department(
    &self,
    actor: Option<&Person>,
    department_id: DepartmentId,
    person_id: PrincipalId,
  ) -> Result<Person> {
    self.authorize(actor, Action::EditDepartment, None).await?;
    let mut person = self.person(person_id).await?;
    if person.department_id != Some(department_id) {
      return Ok(person);
    }
    person.department_id = None;
    self.store.save_person(person).await.map_err(Error::from_store)
  }

  /// Visible people assigned to a department, optionally including its
  /// descendants, in the default listing order.
  pub async fn people_in_department(
    &self,
    actor: Option<&Person>,
    department_id: DepartmentId,
    include_subtree: bool,
  ) -> Result<Vec<Person>> {
    self.authorize(actor, Action::ListPeople, None).await?;
    self.require_department(department_id).await?;
    let operator = if include_subtree { "within_subtree" } else { "equals" };
    let spec = QuerySpec::default().filter(FilterClause::new(
      "department_id",
      operator,
      [department_id.to_string()],
    ));
    let query = self.engine.build(spec, actor).await?;
    self.engine.fetch(&query, i64::MAX, 0).await
  }

  // ── Listings ──────────────────────────────────────────────────────────

  /// Run `spec` for `actor`: one page plus the counts.
  pub async fn query_people(
    &self,
    actor: Option<&Person>,
    spec: QuerySpec,
    limit: i64,
    offset: i64,
  ) -> Result<QueryPage> {
    self.authorize(actor, Action::ListPeople, None).await?;
    let query = self.engine.build(spec, actor).await?;
    let count = self.engine.count(&query).await?;
    let rows = self.engine.fetch_rows(&query, limit, offset).await?;
    Ok(QueryPage {
      count,
      columns: query.columns().into_iter().map(str::to_owned).collect(),
      rows,
    })
  }

  pub async fn next_birthdays(&self, actor: Option<&Person>, days: u64) -> Result<Vec<Birthday>> {
    self.next_birthdays_at(actor, days, Utc::now().date_naive()).await
  }

  /// Active visible people whose birthday falls within `days` of `today`,
  /// soonest first.
  pub async fn next_birthdays_at(
    &self,
    actor: Option<&Person>,
    days: u64,
    today: NaiveDate,
  ) -> Result<Vec<Birthday>> {
    self.authorize(actor, Action::ListPeople, None).await?;
    let until = today.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX);
    let mut out: Vec<Birthday> = self
      .visible_people(actor)
      .await?
      .into_iter()
      .filter(Person::is_active)
      .filter_map(|person| {
        let date = person.next_birthday(today).filter(|d| *d <= until)?;
        let age = person.age(date);
        Some(Birthday { person, date, age })
      })
      .collect();
    out.sort_by(|a, b| {
      (a.date, a.person.name(), a.person.id).cmp(&(b.date, b.person.name(), b.person.id))
    });
    Ok(out)
  }

  /// The `limit` most recently joined active visible people.
  pub async fn newcomers(&self, actor: Option<&Person>, limit: usize) -> Result<Vec<Person>> {
    self.authorize(actor, Action::ListPeople, None).await?;
    let mut people: Vec<Person> = self
      .visible_people(actor)
      .await?
      .into_iter()
      .filter(|p| p.is_active() && p.information.appearance_date.is_some())
      .collect();
    people.sort_by(|a, b| {
      b.information
        .appearance_date
        .cmp(&a.information.appearance_date)
        .then(b.id.cmp(&a.id))
    });
    people.truncate(limit);
    Ok(people)
  }

  // ── Access control and groups ─────────────────────────────────────────

  pub async fn grant(
    &self,
    actor: Option<&Person>,
    principal_id: PrincipalId,
    permissions: Vec<String>,
  ) -> Result<Vec<AclEntry>> {
    let admin = self.require_admin(actor)?;
    let entries = self
      .store
      .grant(principal_id, permissions)
      .await
      .map_err(Error::from_store)?;
    info!(by = admin.id, principal = principal_id, count = entries.len(), "permissions granted");
    Ok(entries)
  }

  pub async fn revoke(&self, actor: Option<&Person>, entry_id: AclEntryId) -> Result<()> {
    let admin = self.require_admin(actor)?;
    self.store.revoke(entry_id).await.map_err(Error::from_store)?;
    info!(by = admin.id, entry = entry_id, "permission revoked");
    Ok(())
  }

  pub async fn all_grants(&self, actor: Option<&Person>) -> Result<Vec<PrincipalGrants>> {
    self.require_admin(actor)?;
    self.store.all_grants().await.map_err(Error::from_store)
  }

  /// Permissions granted directly to `principal_id`.
  pub async fn permissions_for(
    &self,
    actor: Option<&Person>,
    principal_id: PrincipalId,
  ) -> Result<BTreeSet<Permission>> {
    self.require_admin(actor)?;
    if self.store.get_principal(principal_id).await.map_err(Error::from_store)?.is_none() {
      return Err(Error::PrincipalNotFound(principal_id));
    }
    self.store.permissions_for(principal_id).await.map_err(Error::from_store)
  }

  pub async fn add_group(&self, actor: Option<&Person>, name: &str) -> Result<Group> {
    self.require_admin(actor)?;
    let name = name.trim();
    if name.is_empty() {
      return Err(Error::InvalidRecord("group name must not be blank".into()));
    }
    self.store.add_group(name.to_owned()).await.map_err(Error::from_store)
  }

  pub async fn list_groups(&self, actor: Option<&Person>) -> Result<Vec<Group>> {
    self.require_admin(actor)?;
    self.store.list_groups().await.map_err(Error::from_store)
  }

  pub async fn add_group_member(
    &self,
    actor: Option<&Person>,
    group_id: PrincipalId,
    user_id: PrincipalId,
  ) -> Result<()> {
    self.require_admin(actor)?;
    self.store.add_group_member(group_id, user_id).await.map_err(Error::from_store)
  }

  pub async fn remove_group_member(
    &self,
    actor: Option<&Person>,
    group_id: PrincipalId,
    user_id: PrincipalId,
  ) -> Result<()> {
    self.require_admin(actor)?;
    self.store.remove_group_member(group_id, user_id).await.map_err(Error::from_store)
  }

  // ── Saved queries ─────────────────────────────────────────────────────

  /// Saved queries `actor` may see, by name.
  pub async fn visible_queries(&self, actor: Option<&Person>) -> Result<Vec<SavedQuery>> {
    let Some(actor) = actor else {
      return Ok(Vec::new());
    };
    let mut queries: Vec<SavedQuery> = self
      .store
      .list_queries()
      .await
      .map_err(Error::from_store)?
      .into_iter()
      .filter(|q| q.visible_to(actor))
      .collect();
    queries.sort_by(|a, b| (a.name().to_lowercase(), a.id).cmp(&(b.name().to_lowercase(), b.id)));
    Ok(queries)
  }

  pub async fn save_query(&self, actor: Option<&Person>, spec: QuerySpec) -> Result<SavedQuery> {
    let owner = actor.ok_or(Error::Unauthorized)?;
    let spec = self.checked_spec(actor, spec).await?;
    if spec.is_public() {
      self.authorize(actor, Action::ManagePublicQueries, None).await?;
    }
    let saved = self.store.save_query(owner.id, spec).await.map_err(Error::from_store)?;
    info!(owner = owner.id, query = saved.id, "query saved");
    Ok(saved)
  }

  pub async fn update_query(
    &self,
    actor: Option<&Person>,
    id: QueryId,
    spec: QuerySpec,
  ) -> Result<SavedQuery> {
    self.require_editable_query(actor, id).await?;
    let spec = self.checked_spec(actor, spec).await?;
    if spec.is_public() {
      self.authorize(actor, Action::ManagePublicQueries, None).await?;
    }
    self.store.update_query(id, spec).await.map_err(Error::from_store)
  }

  pub async fn delete_query(&self, actor: Option<&Person>, id: QueryId) -> Result<()> {
    self.require_editable_query(actor, id).await?;
    self.store.delete_query(id).await.map_err(Error::from_store)
  }

  async fn require_editable_query(&self, actor: Option<&Person>, id: QueryId) -> Result<SavedQuery> {
    let user = actor.ok_or(Error::Unauthorized)?;
    let existing = self
      .store
      .get_query(id)
      .await
      .map_err(Error::from_store)?
      .ok_or(Error::QueryNotFound(id))?;
    let can_manage_public = self
      .resolver
      .allowed(actor, Permission::ManagePublicPeopleQueries, None)
      .await;
    if !existing.editable_by(user, can_manage_public) {
      warn!(user = user.id, query = id, "saved query not editable");
      return Err(Error::Unauthorized);
    }
    Ok(existing)
  }

  /// A spec fit for storing: named, self-contained and valid.
  async fn checked_spec(&self, actor: Option<&Person>, mut spec: QuerySpec) -> Result<QuerySpec> {
    spec.validate_for_saving()?;
    spec.saved_query_id = None;
    self.engine.build(spec.clone(), actor).await?;
    Ok(spec)
  }
}

fn department_name(name: &str) -> Result<String> {
  let name = name.trim();
  if name.is_empty() {
    return Err(Error::InvalidRecord("department name must not be blank".into()));
  }
  Ok(name.to_owned())
}

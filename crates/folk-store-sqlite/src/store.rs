//! [`SqliteStore`], the SQLite implementation of [`DirectoryStore`].

use std::{
  collections::{BTreeMap, BTreeSet},
  path::Path,
};

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tracing::{debug, info};

use folk_core::{
  acl::{AclEntry, AclEntryId, Permission, PrincipalGrants, parse_permissions},
  department::{DepartmentId, DepartmentRecord, DepartmentTree},
  person::{NewPerson, Person, normalize_tags},
  principal::{Group, Principal, PrincipalId, PrincipalKind},
  query::{QueryId, QuerySpec, SavedQuery},
  store::DirectoryStore,
};

use crate::{
  Error, Result,
  encode::{
    PERSON_COLUMNS, RawAclEntry, RawGroups, RawPeople, RawPerson, RawQuery,
    decode_kind, decode_permission, department_from_row, encode_custom_fields,
    encode_dt, encode_information, encode_spec, encode_status, encode_tags,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Folk directory backed by a single SQLite file.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn people_where(
    &self,
    filter: &'static str,
    arg: Option<rusqlite::types::Value>,
  ) -> Result<Vec<Person>> {
    let raw = self
      .conn
      .call(move |conn| {
        let args: Vec<rusqlite::types::Value> = arg.into_iter().collect();
        Ok(load_people(conn, filter, rusqlite::params_from_iter(args))?)
      })
      .await?;
    raw.into_people()
  }

  /// Run a structural department edit in one `BEGIN IMMEDIATE` transaction.
  async fn edit_tree<R, F>(&self, edit: F) -> Result<R>
  where
    R: Send + 'static,
    F: FnOnce(&rusqlite::Transaction<'_>, &mut DepartmentTree) -> Result<R> + Send + 'static,
  {
    self
      .conn
      .call(move |conn| Ok(with_tree(conn, edit)))
      .await?
  }
}

// ─── Connection-thread helpers ───────────────────────────────────────────────

fn load_departments(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<DepartmentRecord>> {
  let mut stmt =
    conn.prepare("SELECT id, name, parent_id, lft, rgt FROM departments ORDER BY lft, id")?;
  let rows = stmt.query_map([], department_from_row)?.collect();
  rows
}

/// Load the forest, let `edit` change it, write back every record whose
/// bounds, name or parent changed, and commit. Any error rolls back.
fn with_tree<R>(
  conn: &mut rusqlite::Connection,
  edit: impl FnOnce(&rusqlite::Transaction<'_>, &mut DepartmentTree) -> Result<R>,
) -> Result<R> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let before = DepartmentTree::from_records(load_departments(&tx)?);
  let mut tree = before.clone();
  let out = edit(&tx, &mut tree)?;

  let changed = tree.changed_from(&before);
  {
    let mut update = tx.prepare(
      "UPDATE departments SET name = ?1, parent_id = ?2, lft = ?3, rgt = ?4 WHERE id = ?5",
    )?;
    for d in &changed {
      update.execute(rusqlite::params![d.name, d.parent_id, d.lft, d.rgt, d.id])?;
    }
  }
  let written = changed.len();
  tx.commit()?;
  debug!(written, "department bounds renumbered");
  Ok(out)
}

fn load_member_pairs(
  conn: &rusqlite::Connection,
) -> rusqlite::Result<Vec<(PrincipalId, PrincipalId)>> {
  let mut stmt =
    conn.prepare("SELECT group_id, user_id FROM group_members ORDER BY group_id, user_id")?;
  let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?.collect();
  rows
}

fn load_people(
  conn: &rusqlite::Connection,
  filter: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<RawPeople> {
  let sql = format!(
    "SELECT {PERSON_COLUMNS} FROM people pe
     JOIN principals pr ON pr.id = pe.principal_id
     {filter}
     ORDER BY pe.principal_id"
  );
  let mut stmt = conn.prepare(&sql)?;
  let people = stmt
    .query_map(params, RawPerson::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  let members = load_member_pairs(conn)?;
  Ok(RawPeople { people, members })
}

fn load_groups(conn: &rusqlite::Connection) -> rusqlite::Result<RawGroups> {
  let mut stmt = conn
    .prepare("SELECT principal_id, name FROM groups ORDER BY name COLLATE NOCASE, principal_id")?;
  let groups = stmt
    .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  let members = load_member_pairs(conn)?;
  Ok(RawGroups { groups, members })
}

fn principal_kind(
  conn: &rusqlite::Connection,
  id: PrincipalId,
) -> rusqlite::Result<Option<String>> {
  conn
    .query_row("SELECT kind FROM principals WHERE id = ?1", rusqlite::params![id], |r| r.get(0))
    .optional()
}

/// Is `login` held by anyone other than `except`?
fn login_taken(
  conn: &rusqlite::Connection,
  login: &str,
  except: Option<PrincipalId>,
) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM people WHERE login = ?1 AND principal_id IS NOT ?2",
        rusqlite::params![login, except],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

// ─── DirectoryStore impl ─────────────────────────────────────────────────────

impl DirectoryStore for SqliteStore {
  type Error = Error;

  // ── Departments ───────────────────────────────────────────────────────────

  async fn insert_department(
    &self,
    name: String,
    parent_id: Option<DepartmentId>,
  ) -> Result<DepartmentRecord> {
    let record = self
      .edit_tree(move |tx, tree| {
        if let Some(parent) = parent_id
          && tree.get(parent).is_none()
        {
          return Err(folk_core::Error::DepartmentNotFound(parent).into());
        }
        tx.execute(
          "INSERT INTO departments (name, parent_id, lft, rgt) VALUES (?1, ?2, 0, 1)",
          rusqlite::params![name, parent_id],
        )?;
        let id = tx.last_insert_rowid();
        Ok(tree.insert(id, name, parent_id)?)
      })
      .await?;
    info!(id = record.id, name = %record.name, "department created");
    Ok(record)
  }

  async fn move_department(
    &self,
    id: DepartmentId,
    new_parent: Option<DepartmentId>,
  ) -> Result<DepartmentRecord> {
    let record = self
      .edit_tree(move |_, tree| Ok(tree.reparent(id, new_parent)?))
      .await?;
    info!(id, parent = ?new_parent, "department moved");
    Ok(record)
  }

  async fn rename_department(&self, id: DepartmentId, name: String) -> Result<DepartmentRecord> {
    self
      .edit_tree(move |_, tree| Ok(tree.rename(id, name)?))
      .await
  }

  async fn delete_department(&self, id: DepartmentId) -> Result<DepartmentRecord> {
    let record = self
      .edit_tree(move |tx, tree| {
        let removed = tree.remove(id)?;
        tx.execute("DELETE FROM departments WHERE id = ?1", rusqlite::params![id])?;
        Ok(removed)
      })
      .await?;
    info!(id, name = %record.name, "department deleted");
    Ok(record)
  }

  async fn get_department(&self, id: DepartmentId) -> Result<Option<DepartmentRecord>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(
            conn
              .query_row(
                "SELECT id, name, parent_id, lft, rgt FROM departments WHERE id = ?1",
                rusqlite::params![id],
                department_from_row,
              )
              .optional()?,
          )
        })
        .await?,
    )
  }

  async fn department_tree(&self) -> Result<DepartmentTree> {
    let records = self
      .conn
      .call(|conn| Ok(load_departments(conn)?))
      .await?;
    Ok(DepartmentTree::from_records(records))
  }

  // ── People ────────────────────────────────────────────────────────────────

  async fn add_person(&self, input: NewPerson) -> Result<Person> {
    input.validate()?;

    let login          = input.login.trim().to_owned();
    let firstname      = input.firstname.trim().to_owned();
    let lastname       = input.lastname.trim().to_owned();
    let mail           = input.mail.clone();
    let admin          = input.admin;
    let status_str     = encode_status(input.status);
    let department_id  = input.department_id;
    let information    = encode_information(&input.information)?;
    let tags_str       = encode_tags(&normalize_tags(input.tags))?;
    let custom_str     = encode_custom_fields(&input.custom_fields)?;
    let created_at_str = encode_dt(Utc::now());

    let wanted = login.clone();
    let id: Option<PrincipalId> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if login_taken(&tx, &login, None)? {
          return Ok(None);
        }
        tx.execute(
          "INSERT INTO principals (kind, created_at) VALUES ('user', ?1)",
          rusqlite::params![created_at_str],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
          "INSERT INTO people (
             principal_id, login, firstname, lastname, mail, admin, status,
             department_id, information, tags, custom_fields
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          rusqlite::params![
            id,
            login,
            firstname,
            lastname,
            mail,
            admin,
            status_str,
            department_id,
            information,
            tags_str,
            custom_str,
          ],
        )?;
        tx.commit()?;
        Ok(Some(id))
      })
      .await?;

    let id = id.ok_or_else(|| folk_core::Error::Conflict(format!("login {wanted:?} is taken")))?;
    self
      .get_person(id)
      .await?
      .ok_or(Error::Core(folk_core::Error::PrincipalNotFound(id)))
  }

  async fn get_person(&self, id: PrincipalId) -> Result<Option<Person>> {
    let people = self
      .people_where("WHERE pe.principal_id = ?1", Some(id.into()))
      .await?;
    Ok(people.into_iter().next())
  }

  async fn find_person_by_login(&self, login: String) -> Result<Option<Person>> {
    let people = self
      .people_where("WHERE pe.login = ?1", Some(login.trim().to_owned().into()))
      .await?;
    Ok(people.into_iter().next())
  }

  async fn list_people(&self) -> Result<Vec<Person>> { self.people_where("", None).await }

  async fn save_person(&self, person: Person) -> Result<Person> {
    let id             = person.id;
    let login          = person.login.trim().to_owned();
    let status_str     = encode_status(person.status);
    let information    = encode_information(&person.information)?;
    let tags_str       = encode_tags(&normalize_tags(person.tags))?;
    let custom_str     = encode_custom_fields(&person.custom_fields)?;
    let Person { firstname, lastname, mail, admin, department_id, .. } = person;

    let outcome: std::result::Result<(), folk_core::Error> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if login_taken(&tx, &login, Some(id))? {
          return Ok(Err(folk_core::Error::Conflict(format!("login {login:?} is taken"))));
        }
        let n = tx.execute(
          "UPDATE people SET
             login = ?1, firstname = ?2, lastname = ?3, mail = ?4, admin = ?5,
             status = ?6, department_id = ?7, information = ?8, tags = ?9,
             custom_fields = ?10
           WHERE principal_id = ?11",
          rusqlite::params![
            login,
            firstname,
            lastname,
            mail,
            admin,
            status_str,
            department_id,
            information,
            tags_str,
            custom_str,
            id,
          ],
        )?;
        if n == 0 {
          return Ok(Err(folk_core::Error::PrincipalNotFound(id)));
        }
        tx.commit()?;
        Ok(Ok(()))
      })
      .await?;
    outcome?;

    self
      .get_person(id)
      .await?
      .ok_or(Error::Core(folk_core::Error::PrincipalNotFound(id)))
  }

  async fn delete_person(&self, id: PrincipalId) -> Result<()> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM principals WHERE id = ?1 AND kind = 'user'",
          rusqlite::params![id],
        )?)
      })
      .await?;
    if n == 0 {
      return Err(folk_core::Error::PrincipalNotFound(id).into());
    }
    Ok(())
  }

  // ── Groups and principals ─────────────────────────────────────────────────

  async fn add_group(&self, name: String) -> Result<Group> {
    let name = name.trim().to_owned();
    let created_at_str = encode_dt(Utc::now());

    let wanted = name.clone();
    let id: Option<PrincipalId> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let taken = tx
          .query_row("SELECT 1 FROM groups WHERE name = ?1", rusqlite::params![name], |_| Ok(()))
          .optional()?
          .is_some();
        if taken {
          return Ok(None);
        }
        tx.execute(
          "INSERT INTO principals (kind, created_at) VALUES ('group', ?1)",
          rusqlite::params![created_at_str],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
          "INSERT INTO groups (principal_id, name) VALUES (?1, ?2)",
          rusqlite::params![id, name],
        )?;
        tx.commit()?;
        Ok(Some(id))
      })
      .await?;

    let id = id.ok_or_else(|| folk_core::Error::Conflict(format!("group {wanted:?} exists")))?;
    info!(id, name = %wanted, "group created");
    Ok(Group { id, name: wanted, member_ids: Vec::new() })
  }

  async fn list_groups(&self) -> Result<Vec<Group>> {
    let raw = self
      .conn
      .call(|conn| Ok(load_groups(conn)?))
      .await?;
    Ok(raw.into_groups())
  }

  async fn add_group_member(&self, group_id: PrincipalId, user_id: PrincipalId) -> Result<()> {
    let outcome: std::result::Result<(), folk_core::Error> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if principal_kind(&tx, group_id)?.as_deref() != Some("group") {
          return Ok(Err(folk_core::Error::PrincipalNotFound(group_id)));
        }
        if principal_kind(&tx, user_id)?.as_deref() != Some("user") {
          return Ok(Err(folk_core::Error::PrincipalNotFound(user_id)));
        }
        tx.execute(
          "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
          rusqlite::params![group_id, user_id],
        )?;
        tx.commit()?;
        Ok(Ok(()))
      })
      .await?;
    Ok(outcome?)
  }

  async fn remove_group_member(&self, group_id: PrincipalId, user_id: PrincipalId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
          rusqlite::params![group_id, user_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
    let kind = self
      .conn
      .call(move |conn| Ok(principal_kind(conn, id)?))
      .await?;
    let Some(kind) = kind else {
      return Ok(None);
    };
    match decode_kind(&kind)? {
      PrincipalKind::User => Ok(self.get_person(id).await?.map(Principal::User)),
      PrincipalKind::Group => Ok(
        self
          .list_groups()
          .await?
          .into_iter()
          .find(|g| g.id == id)
          .map(Principal::Group),
      ),
    }
  }

  // ── Access control ────────────────────────────────────────────────────────

  async fn grant(
    &self,
    principal_id: PrincipalId,
    permissions: Vec<String>,
  ) -> Result<Vec<AclEntry>> {
    // Validate every name before anything is written.
    let names: Vec<String> = parse_permissions(&permissions)?
      .into_iter()
      .map(|p| p.to_string())
      .collect();

    let count = names.len();
    let raws: Option<Vec<RawAclEntry>> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if principal_kind(&tx, principal_id)?.is_none() {
          return Ok(None);
        }
        {
          let mut insert = tx.prepare(
            "INSERT OR IGNORE INTO people_acl (principal_id, permission) VALUES (?1, ?2)",
          )?;
          for name in &names {
            insert.execute(rusqlite::params![principal_id, name])?;
          }
        }
        let entries = {
          let mut stmt = tx.prepare(
            "SELECT id, principal_id, permission FROM people_acl
             WHERE principal_id = ?1 ORDER BY id",
          )?;
          stmt
            .query_map(rusqlite::params![principal_id], RawAclEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;
        Ok(Some(
          entries
            .into_iter()
            .filter(|e| names.contains(&e.permission))
            .collect(),
        ))
      })
      .await?;

    let raws = raws.ok_or(folk_core::Error::PrincipalNotFound(principal_id))?;
    info!(principal = principal_id, count, "permissions granted");
    raws.into_iter().map(RawAclEntry::into_entry).collect()
  }

  async fn revoke(&self, entry_id: AclEntryId) -> Result<()> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM people_acl WHERE id = ?1", rusqlite::params![entry_id])?)
      })
      .await?;
    if n > 0 {
      info!(entry = entry_id, "permission revoked");
    }
    Ok(())
  }

  async fn permissions_for(&self, principal_id: PrincipalId) -> Result<BTreeSet<Permission>> {
    self.permissions_for_any(vec![principal_id]).await
  }

  async fn permissions_for_any(
    &self,
    principal_ids: Vec<PrincipalId>,
  ) -> Result<BTreeSet<Permission>> {
    if principal_ids.is_empty() {
      return Ok(BTreeSet::new());
    }
    let names: Vec<String> = self
      .conn
      .call(move |conn| {
        let placeholders = vec!["?"; principal_ids.len()].join(", ");
        let sql = format!(
          "SELECT DISTINCT permission FROM people_acl WHERE principal_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(principal_ids.iter()), |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    names.iter().map(|n| decode_permission(n)).collect()
  }

  async fn all_grants(&self) -> Result<Vec<PrincipalGrants>> {
    let (raw_entries, raw_people, raw_groups) = self
      .conn
      .call(|conn| {
        let entries = {
          let mut stmt =
            conn.prepare("SELECT id, principal_id, permission FROM people_acl ORDER BY id")?;
          stmt
            .query_map([], RawAclEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let people = load_people(
          conn,
          "WHERE pe.principal_id IN (SELECT principal_id FROM people_acl)",
          [],
        )?;
        let groups = load_groups(conn)?;
        Ok((entries, people, groups))
      })
      .await?;

    let mut summaries = BTreeMap::new();
    for person in raw_people.into_people()? {
      let principal = Principal::User(person);
      summaries.insert(principal.id(), principal.summary());
    }
    for group in raw_groups.into_groups() {
      let principal = Principal::Group(group);
      summaries.insert(principal.id(), principal.summary());
    }

    let mut by_principal: BTreeMap<PrincipalId, Vec<AclEntry>> = BTreeMap::new();
    for raw in raw_entries {
      let entry = raw.into_entry()?;
      by_principal.entry(entry.principal_id).or_default().push(entry);
    }

    let mut grants: Vec<PrincipalGrants> = by_principal
      .into_iter()
      .filter_map(|(id, entries)| {
        let principal = summaries.remove(&id)?;
        Some(PrincipalGrants { principal, entries })
      })
      .collect();
    grants.sort_by_key(|g| g.principal.listing_key());
    Ok(grants)
  }

  // ── Saved queries ─────────────────────────────────────────────────────────

  async fn save_query(&self, owner_id: PrincipalId, spec: QuerySpec) -> Result<SavedQuery> {
    let spec_json = encode_spec(&spec)?;
    let name = spec.name.clone().unwrap_or_default();
    let is_public = spec.is_public();

    let id: Option<QueryId> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if principal_kind(&tx, owner_id)?.is_none() {
          return Ok(None);
        }
        tx.execute(
          "INSERT INTO people_queries (name, owner_id, is_public, spec_json)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![name, owner_id, is_public, spec_json],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Some(id))
      })
      .await?;

    let id = id.ok_or(folk_core::Error::PrincipalNotFound(owner_id))?;
    Ok(SavedQuery { id, owner_id, spec })
  }

  async fn update_query(&self, id: QueryId, spec: QuerySpec) -> Result<SavedQuery> {
    let spec_json = encode_spec(&spec)?;
    let name = spec.name.clone().unwrap_or_default();
    let is_public = spec.is_public();

    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE people_queries SET name = ?1, is_public = ?2, spec_json = ?3 WHERE id = ?4",
          rusqlite::params![name, is_public, spec_json, id],
        )?)
      })
      .await?;
    if n == 0 {
      return Err(folk_core::Error::QueryNotFound(id).into());
    }
    self
      .get_query(id)
      .await?
      .ok_or(Error::Core(folk_core::Error::QueryNotFound(id)))
  }

  async fn get_query(&self, id: QueryId) -> Result<Option<SavedQuery>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT id, owner_id, spec_json FROM people_queries WHERE id = ?1",
              rusqlite::params![id],
              RawQuery::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawQuery::into_query).transpose()
  }

  async fn list_queries(&self) -> Result<Vec<SavedQuery>> {
    let raws = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT id, owner_id, spec_json FROM people_queries ORDER BY id")?;
        let rows = stmt
          .query_map([], RawQuery::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawQuery::into_query).collect()
  }

  async fn delete_query(&self, id: QueryId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM people_queries WHERE id = ?1", rusqlite::params![id])?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

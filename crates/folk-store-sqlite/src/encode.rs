//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Directory information, tags, custom
//! fields and query specs are compact JSON. Enums use their `strum` names.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, Utc};
use folk_core::{
  acl::{AclEntry, Permission},
  department::DepartmentRecord,
  person::{PeopleInformation, Person},
  principal::{Group, PrincipalId, PrincipalKind, UserStatus},
  query::{QuerySpec, SavedQuery},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_status(s: UserStatus) -> String { s.to_string() }

pub fn decode_status(s: &str) -> Result<UserStatus> {
  UserStatus::from_str(s).map_err(|_| Error::Decode { column: "status", value: s.to_owned() })
}

pub fn decode_kind(s: &str) -> Result<PrincipalKind> {
  PrincipalKind::from_str(s).map_err(|_| Error::Decode { column: "kind", value: s.to_owned() })
}

pub fn decode_permission(s: &str) -> Result<Permission> {
  Permission::from_str(s)
    .map_err(|_| Error::Decode { column: "permission", value: s.to_owned() })
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_information(info: &PeopleInformation) -> Result<String> {
  Ok(serde_json::to_string(info)?)
}

pub fn encode_tags(tags: &[String]) -> Result<String> { Ok(serde_json::to_string(tags)?) }

pub fn encode_custom_fields(fields: &BTreeMap<String, String>) -> Result<String> {
  Ok(serde_json::to_string(fields)?)
}

pub fn encode_spec(spec: &QuerySpec) -> Result<String> { Ok(serde_json::to_string(spec)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawPerson::from_row`].
pub const PERSON_COLUMNS: &str = "pe.principal_id, pe.login, pe.firstname, pe.lastname, \
  pe.mail, pe.admin, pe.status, pe.department_id, pe.information, pe.tags, \
  pe.custom_fields, pr.created_at";

/// Raw values read from a `people` row joined with `principals`.
pub struct RawPerson {
  pub id:            i64,
  pub login:         String,
  pub firstname:     String,
  pub lastname:      String,
  pub mail:          Option<String>,
  pub admin:         bool,
  pub status:        String,
  pub department_id: Option<i64>,
  pub information:   String,
  pub tags:          String,
  pub custom_fields: String,
  pub created_at:    String,
}

impl RawPerson {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      login:         row.get(1)?,
      firstname:     row.get(2)?,
      lastname:      row.get(3)?,
      mail:          row.get(4)?,
      admin:         row.get(5)?,
      status:        row.get(6)?,
      department_id: row.get(7)?,
      information:   row.get(8)?,
      tags:          row.get(9)?,
      custom_fields: row.get(10)?,
      created_at:    row.get(11)?,
    })
  }

  pub fn into_person(self, group_ids: Vec<PrincipalId>) -> Result<Person> {
    Ok(Person {
      id: self.id,
      login: self.login,
      firstname: self.firstname,
      lastname: self.lastname,
      mail: self.mail,
      admin: self.admin,
      status: decode_status(&self.status)?,
      department_id: self.department_id,
      group_ids,
      information: serde_json::from_str(&self.information)?,
      tags: serde_json::from_str(&self.tags)?,
      custom_fields: serde_json::from_str(&self.custom_fields)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// People rows plus every `(group_id, user_id)` membership pair.
pub struct RawPeople {
  pub people:  Vec<RawPerson>,
  pub members: Vec<(PrincipalId, PrincipalId)>,
}

impl RawPeople {
  pub fn into_people(self) -> Result<Vec<Person>> {
    let mut groups_of: BTreeMap<PrincipalId, Vec<PrincipalId>> = BTreeMap::new();
    for (group_id, user_id) in self.members {
      groups_of.entry(user_id).or_default().push(group_id);
    }
    self
      .people
      .into_iter()
      .map(|raw| {
        let groups = groups_of.remove(&raw.id).unwrap_or_default();
        raw.into_person(groups)
      })
      .collect()
  }
}

/// Groups rows plus their membership pairs.
pub struct RawGroups {
  pub groups:  Vec<(PrincipalId, String)>,
  pub members: Vec<(PrincipalId, PrincipalId)>,
}

impl RawGroups {
  pub fn into_groups(self) -> Vec<Group> {
    let mut members_of: BTreeMap<PrincipalId, Vec<PrincipalId>> = BTreeMap::new();
    for (group_id, user_id) in self.members {
      members_of.entry(group_id).or_default().push(user_id);
    }
    self
      .groups
      .into_iter()
      .map(|(id, name)| Group {
        id,
        name,
        member_ids: members_of.remove(&id).unwrap_or_default(),
      })
      .collect()
  }
}

pub fn department_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DepartmentRecord> {
  Ok(DepartmentRecord {
    id:        row.get(0)?,
    name:      row.get(1)?,
    parent_id: row.get(2)?,
    lft:       row.get(3)?,
    rgt:       row.get(4)?,
  })
}

/// Raw values read from a `people_acl` row.
pub struct RawAclEntry {
  pub id:           i64,
  pub principal_id: i64,
  pub permission:   String,
}

impl RawAclEntry {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      principal_id: row.get(1)?,
      permission:   row.get(2)?,
    })
  }

  pub fn into_entry(self) -> Result<AclEntry> {
    Ok(AclEntry {
      id:           self.id,
      principal_id: self.principal_id,
      permission:   decode_permission(&self.permission)?,
    })
  }
}

/// Raw values read from a `people_queries` row.
pub struct RawQuery {
  pub id:        i64,
  pub owner_id:  i64,
  pub spec_json: String,
}

impl RawQuery {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:        row.get(0)?,
      owner_id:  row.get(1)?,
      spec_json: row.get(2)?,
    })
  }

  pub fn into_query(self) -> Result<SavedQuery> {
    Ok(SavedQuery {
      id:       self.id,
      owner_id: self.owner_id,
      spec:     serde_json::from_str(&self.spec_json)?,
    })
  }
}

//! Query specifications, the declarative and serialisable description of a
//! people listing, plus saved queries.
//!
//! A [`QuerySpec`] is deliberately stringly typed: it arrives from callers
//! and from storage as-is, and is only validated when bound by
//! [`crate::engine::QueryEngine::build`].

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  person::Person,
  principal::PrincipalId,
};

pub type QueryId = i64;

/// Who may see a saved query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryVisibility {
  /// Only the owner.
  #[default]
  Private,
  /// Everyone; creating or editing requires `manage_public_people_queries`.
  Public,
}

/// One `(field, operator, values)` filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterClause {
  pub field:    String,
  pub operator: String,
  #[serde(default)]
  pub values:   Vec<String>,
}

impl FilterClause {
  pub fn new<I, V>(field: impl Into<String>, operator: impl Into<String>, values: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<String>,
  {
    Self {
      field:    field.into(),
      operator: operator.into(),
      values:   values.into_iter().map(Into::into).collect(),
    }
  }
}

/// One sort criterion; `direction` is `"asc"` or `"desc"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
  pub field:     String,
  #[serde(default = "default_direction")]
  pub direction: String,
}

fn default_direction() -> String { "asc".to_owned() }

impl SortKey {
  pub fn asc(field: impl Into<String>) -> Self {
    Self { field: field.into(), direction: "asc".into() }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self { field: field.into(), direction: "desc".into() }
  }
}

/// A people listing: filters, columns, grouping, sort and search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
  /// `None` for an anonymous, ad-hoc listing.
  pub name:           Option<String>,
  pub filters:        Vec<FilterClause>,
  /// Columns to project fetched rows onto. Empty selects the defaults.
  pub columns:        Vec<String>,
  pub group_by:       Option<String>,
  /// Empty selects `lastname asc, firstname asc`.
  pub sort:           Vec<SortKey>,
  /// Free-text term matched against names, login, mail and tags.
  pub search:         Option<String>,
  pub visibility:     QueryVisibility,
  /// Run a saved query instead of the clauses above. A `search` term given
  /// here still applies.
  pub saved_query_id: Option<QueryId>,
}

impl QuerySpec {
  pub fn filter(mut self, clause: FilterClause) -> Self {
    self.filters.push(clause);
    self
  }

  pub fn sorted_by(mut self, key: SortKey) -> Self {
    self.sort.push(key);
    self
  }

  pub fn grouped_by(mut self, field: impl Into<String>) -> Self {
    self.group_by = Some(field.into());
    self
  }

  pub fn searching(mut self, term: impl Into<String>) -> Self {
    self.search = Some(term.into());
    self
  }

  pub fn is_public(&self) -> bool { self.visibility == QueryVisibility::Public }

  /// Saved queries need a name; ad-hoc ones don't.
  pub fn validate_for_saving(&self) -> Result<()> {
    match self.name.as_deref().map(str::trim) {
      Some(name) if !name.is_empty() => Ok(()),
      _ => Err(Error::InvalidRecord("a saved query needs a name".into())),
    }
  }
}

/// A persisted [`QuerySpec`] with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedQuery {
  pub id:       QueryId,
  pub owner_id: PrincipalId,
  pub spec:     QuerySpec,
}

impl SavedQuery {
  pub fn name(&self) -> &str { self.spec.name.as_deref().unwrap_or_default() }

  pub fn is_public(&self) -> bool { self.spec.is_public() }

  /// Public queries are visible to everyone, private ones to their owner.
  pub fn visible_to(&self, user: &Person) -> bool {
    self.is_public() || self.owner_id == user.id
  }

  /// `can_manage_public` is the user's `manage_public_people_queries`
  /// decision.
  pub fn editable_by(&self, user: &Person, can_manage_public: bool) -> bool {
    if user.admin {
      return true;
    }
    if self.is_public() {
      can_manage_public
    } else {
      self.owner_id == user.id
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::person::tests::person;

  fn saved(id: QueryId, owner_id: PrincipalId, visibility: QueryVisibility) -> SavedQuery {
    SavedQuery {
      id,
      owner_id,
      spec: QuerySpec {
        name: Some(format!("query {id}")),
        visibility,
        ..QuerySpec::default()
      },
    }
  }

  #[test]
  fn private_queries_are_visible_to_their_owner_only() {
    let mut admin = person(1, "Redmine", "Admin");
    admin.admin = true;
    let owner = person(4, "Robert", "Hill");
    let other = person(2, "John", "Smith");

    let public = saved(1, 1, QueryVisibility::Public);
    let private = saved(3, 4, QueryVisibility::Private);

    assert!(public.visible_to(&other));
    assert!(private.visible_to(&owner));
    assert!(!private.visible_to(&other));
    assert!(!private.visible_to(&admin));
  }

  #[test]
  fn public_queries_need_the_management_permission() {
    let owner = person(4, "Robert", "Hill");
    let other = person(2, "John", "Smith");
    let public = saved(1, 4, QueryVisibility::Public);

    assert!(!public.editable_by(&owner, false));
    assert!(!public.editable_by(&other, false));
    assert!(public.editable_by(&other, true));

    let private = saved(2, 4, QueryVisibility::Private);
    assert!(private.editable_by(&owner, false));
    assert!(!private.editable_by(&other, true));
  }

  #[test]
  fn spec_roundtrips_through_json_with_defaults() {
    let spec: QuerySpec = serde_json::from_str(
      r#"{"filters":[{"field":"lastname","operator":"contains","values":["Hill"]}],
          "sort":[{"field":"firstname"}]}"#,
    )
    .unwrap();
    assert_eq!(spec.filters[0], FilterClause::new("lastname", "contains", ["Hill"]));
    assert_eq!(spec.sort, vec![SortKey::asc("firstname")]);
    assert_eq!(spec.visibility, QueryVisibility::Private);
    assert!(spec.validate_for_saving().is_err());
  }
}

//! The query engine: build, count and fetch people listings.
//!
//! A [`BoundQuery`] couples a compiled query with the viewer's
//! [`PersonScope`]. Its fields are private, so every count and page the
//! engine produces is filtered through the viewer's visibility; there is no
//! way to run the clauses alone.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::{
  Error, Result,
  filter::{CompiledQuery, FieldRegistry, GroupKey, compile},
  membership::MembershipProvider,
  person::Person,
  query::QuerySpec,
  store::DirectoryStore,
  visibility::{PersonScope, VisibilityResolver},
};

/// A validated query bound to the viewer it runs for.
#[derive(Debug, Clone)]
pub struct BoundQuery {
  spec:     QuerySpec,
  compiled: CompiledQuery,
  scope:    PersonScope,
}

impl BoundQuery {
  /// The effective spec; for a saved query, the stored one.
  pub fn spec(&self) -> &QuerySpec { &self.spec }

  pub fn scope(&self) -> &PersonScope { &self.scope }

  pub fn columns(&self) -> Vec<&str> { self.compiled.columns() }

  /// `person` projected onto the selected columns.
  pub fn project(&self, person: &Person) -> Map<String, Json> {
    self.compiled.project(person)
  }
}

/// Result of [`QueryEngine::count`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryCount {
  pub total:    usize,
  /// Present only for grouped queries.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub by_group: Option<BTreeMap<GroupKey, usize>>,
}

pub struct QueryEngine<S, M> {
  store:    Arc<S>,
  resolver: VisibilityResolver<S, M>,
  registry: FieldRegistry,
}

impl<S, M> Clone for QueryEngine<S, M> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      resolver: self.resolver.clone(),
      registry: self.registry.clone(),
    }
  }
}

impl<S, M> QueryEngine<S, M>
where
  S: DirectoryStore,
  M: MembershipProvider,
{
  pub fn new(
    store: Arc<S>,
    resolver: VisibilityResolver<S, M>,
    registry: FieldRegistry,
  ) -> Self {
    Self { store, resolver, registry }
  }

  pub fn registry(&self) -> &FieldRegistry { &self.registry }

  /// Validate `spec` and bind it to `actor`, evaluating relative dates
  /// against the current UTC date.
  pub async fn build(&self, spec: QuerySpec, actor: Option<&Person>) -> Result<BoundQuery> {
    self.build_at(spec, actor, Utc::now().date_naive()).await
  }

  pub async fn build_at(
    &self,
    spec: QuerySpec,
    actor: Option<&Person>,
    today: NaiveDate,
  ) -> Result<BoundQuery> {
    let spec = self.resolve_saved(spec, actor).await?;
    let tree = self.store.department_tree().await.map_err(Error::from_store)?;
    let compiled = compile(&spec, &self.registry, &tree, today)?;
    let scope = self.resolver.person_scope(actor).await;
    debug!(
      actor = actor.map(|a| a.id),
      filters = spec.filters.len(),
      ?scope,
      "query bound"
    );
    Ok(BoundQuery { spec, compiled, scope })
  }

  /// Replace a spec naming a saved query with the stored spec. A search term
  /// on the caller's spec is kept.
  async fn resolve_saved(&self, spec: QuerySpec, actor: Option<&Person>) -> Result<QuerySpec> {
    let Some(id) = spec.saved_query_id else {
      return Ok(spec);
    };
    let saved = self
      .store
      .get_query(id)
      .await
      .map_err(Error::from_store)?
      .ok_or(Error::QueryNotFound(id))?;
    if !actor.is_some_and(|a| saved.visible_to(a)) {
      return Err(Error::Unauthorized);
    }
    let mut resolved = saved.spec;
    resolved.saved_query_id = Some(id);
    if spec.search.is_some() {
      resolved.search = spec.search;
    }
    Ok(resolved)
  }

  /// Total matching, visible rows and, for grouped queries, the per-group
  /// counts.
  pub async fn count(&self, query: &BoundQuery) -> Result<QueryCount> {
    let rows = self.visible_rows(query).await?;
    Ok(tally(&query.compiled, &rows))
  }

  /// One sorted page of matching, visible rows. Negative arguments are
  /// clamped to zero; a zero limit yields an empty page.
  pub async fn fetch(&self, query: &BoundQuery, limit: i64, offset: i64) -> Result<Vec<Person>> {
    if limit <= 0 {
      return Ok(Vec::new());
    }
    let mut rows = self.visible_rows(query).await?;
    rows.sort_by(|a, b| query.compiled.compare(a, b));
    Ok(paginate(rows, limit, offset))
  }

  /// [`Self::fetch`], projected onto the query's columns.
  pub async fn fetch_rows(
    &self,
    query: &BoundQuery,
    limit: i64,
    offset: i64,
  ) -> Result<Vec<Map<String, Json>>> {
    let page = self.fetch(query, limit, offset).await?;
    Ok(page.iter().map(|p| query.project(p)).collect())
  }

  async fn visible_rows(&self, query: &BoundQuery) -> Result<Vec<Person>> {
    if query.scope == PersonScope::Nobody {
      return Ok(Vec::new());
    }
    let people = self.store.list_people().await.map_err(Error::from_store)?;
    let mut rows = Vec::new();
    for person in people {
      if query.compiled.matches(&person) && self.resolver.admits(&query.scope, &person).await {
        rows.push(person);
      }
    }
    Ok(rows)
  }
}

fn tally(compiled: &CompiledQuery, rows: &[Person]) -> QueryCount {
  let by_group = compiled.is_grouped().then(|| {
    let mut groups = BTreeMap::new();
    for key in rows.iter().filter_map(|p| compiled.group_key(p)) {
      *groups.entry(key).or_insert(0) += 1;
    }
    groups
  });
  QueryCount { total: rows.len(), by_group }
}

fn paginate<T>(rows: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
  let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
  let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
  rows.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{department::DepartmentTree, person::tests::person};

  #[test]
  fn paginate_clamps_negative_arguments() {
    let rows: Vec<i32> = (1..=5).collect();
    assert_eq!(paginate(rows.clone(), 2, -3), vec![1, 2]);
    assert_eq!(paginate(rows.clone(), 2, 4), vec![5]);
    assert_eq!(paginate(rows.clone(), -1, 0), Vec::<i32>::new());
    assert_eq!(paginate(rows, 10, 10), Vec::<i32>::new());
  }

  #[test]
  fn tally_counts_blank_bucket_separately() {
    let mut tree = DepartmentTree::default();
    tree.insert(1, "Sales", None).unwrap();

    let mut a = person(1, "Ann", "Able");
    a.department_id = Some(1);
    let mut b = person(2, "Bob", "Baker");
    b.department_id = Some(1);
    let c = person(3, "Cid", "Cole");

    let compiled = compile(
      &QuerySpec::default().grouped_by("department_id"),
      &FieldRegistry::default(),
      &tree,
      NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
    )
    .unwrap();
    let count = tally(&compiled, &[a, b, c]);
    assert_eq!(count.total, 3);
    let groups = count.by_group.unwrap();
    assert_eq!(groups[&GroupKey::Department { id: 1, name: "Sales".into() }], 2);
    assert_eq!(groups[&GroupKey::Blank], 1);
  }

  #[test]
  fn tally_keeps_same_named_departments_apart() {
    let mut tree = DepartmentTree::default();
    tree.insert(1, "Sales", None).unwrap();
    tree.insert(2, "Engineering", None).unwrap();
    tree.insert(3, "Support", Some(1)).unwrap();
    tree.insert(4, "Support", Some(2)).unwrap();

    let mut a = person(1, "Ann", "Able");
    a.department_id = Some(3);
    let mut b = person(2, "Bob", "Baker");
    b.department_id = Some(4);

    let compiled = compile(
      &QuerySpec::default().grouped_by("department_id"),
      &FieldRegistry::default(),
      &tree,
      NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
    )
    .unwrap();
    let groups = tally(&compiled, &[a, b]).by_group.unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.values().all(|&n| n == 1));
  }

  #[test]
  fn ungrouped_tally_has_no_buckets() {
    let compiled = compile(
      &QuerySpec::default(),
      &FieldRegistry::default(),
      &DepartmentTree::default(),
      NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
    )
    .unwrap();
    let count = tally(&compiled, &[person(1, "Ann", "Able")]);
    assert_eq!(count, QueryCount { total: 1, by_group: None });
  }
}

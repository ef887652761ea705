//! The department hierarchy as a nested-set interval tree.
//!
//! Every department carries `(lft, rgt)` bounds such that `A` is an ancestor
//! of `B` iff `A.lft < B.lft && B.rgt < A.rgt`. [`DepartmentTree`] owns the
//! bounds: structural edits change `parent_id` links and then renumber the
//! whole forest, so the invariant holds after every operation. Persisting the
//! result atomically is the store's job.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub type DepartmentId = i64;

// ─── Record ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentRecord {
  pub id:        DepartmentId,
  pub name:      String,
  pub parent_id: Option<DepartmentId>,
  pub lft:       i64,
  pub rgt:       i64,
}

impl DepartmentRecord {
  pub fn is_ancestor_of(&self, other: &Self) -> bool {
    self.lft < other.lft && other.rgt < self.rgt
  }

  pub fn is_descendant_of(&self, other: &Self) -> bool {
    other.is_ancestor_of(self)
  }

  /// `true` for `other == self` as well as for every descendant.
  pub fn contains(&self, other: &Self) -> bool {
    self.lft <= other.lft && other.rgt <= self.rgt
  }

  pub fn is_root(&self) -> bool { self.parent_id.is_none() }

  pub fn descendant_count(&self) -> i64 { (self.rgt - self.lft - 1) / 2 }
}

// ─── Tree ────────────────────────────────────────────────────────────────────

/// An in-memory department forest.
///
/// Siblings are ordered by case-folded name, ties broken by id.
#[derive(Debug, Clone, Default)]
pub struct DepartmentTree {
  nodes: BTreeMap<DepartmentId, DepartmentRecord>,
}

impl DepartmentTree {
  /// Wrap records as loaded from storage. Bounds are taken as-is.
  pub fn from_records(records: impl IntoIterator<Item = DepartmentRecord>) -> Self {
    Self {
      nodes: records.into_iter().map(|d| (d.id, d)).collect(),
    }
  }

  pub fn len(&self) -> usize { self.nodes.len() }

  pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

  pub fn get(&self, id: DepartmentId) -> Option<&DepartmentRecord> {
    self.nodes.get(&id)
  }

  fn require(&self, id: DepartmentId) -> Result<&DepartmentRecord> {
    self.nodes.get(&id).ok_or(Error::DepartmentNotFound(id))
  }

  /// Every department in `lft` order (a pre-order walk).
  pub fn records(&self) -> Vec<&DepartmentRecord> {
    let mut out: Vec<&DepartmentRecord> = self.nodes.values().collect();
    out.sort_by_key(|d| (d.lft, d.id));
    out
  }

  pub fn into_records(self) -> Vec<DepartmentRecord> {
    let mut out: Vec<DepartmentRecord> = self.nodes.into_values().collect();
    out.sort_by_key(|d| (d.lft, d.id));
    out
  }

  /// Direct children of `parent` (roots for `None`) in sibling order.
  pub fn children(&self, parent: Option<DepartmentId>) -> Vec<&DepartmentRecord> {
    let mut out: Vec<&DepartmentRecord> = self
      .nodes
      .values()
      .filter(|d| d.parent_id == parent)
      .collect();
    out.sort_by_key(|d| sibling_key(d));
    out
  }

  pub fn has_children(&self, id: DepartmentId) -> bool {
    self.nodes.values().any(|d| d.parent_id == Some(id))
  }

  /// Ancestors of `id`, outermost first.
  pub fn ancestors(&self, id: DepartmentId) -> Result<Vec<DepartmentRecord>> {
    let node = self.require(id)?;
    let mut out: Vec<DepartmentRecord> = self
      .nodes
      .values()
      .filter(|d| d.is_ancestor_of(node))
      .cloned()
      .collect();
    out.sort_by_key(|d| d.lft);
    Ok(out)
  }

  /// `root` and all of its descendants, in `lft` order.
  pub fn subtree(&self, root: DepartmentId) -> Result<Vec<DepartmentRecord>> {
    let root = self.require(root)?;
    let mut out: Vec<DepartmentRecord> = self
      .nodes
      .values()
      .filter(|d| root.lft <= d.lft && d.lft <= root.rgt)
      .cloned()
      .collect();
    out.sort_by_key(|d| d.lft);
    Ok(out)
  }

  pub fn subtree_ids(&self, root: DepartmentId) -> Result<BTreeSet<DepartmentId>> {
    Ok(self.subtree(root)?.into_iter().map(|d| d.id).collect())
  }

  /// Every department `id` may be moved under: all but itself and its
  /// subtree.
  pub fn allowed_parents(&self, id: DepartmentId) -> Result<Vec<DepartmentRecord>> {
    let node = self.require(id)?;
    let mut out: Vec<DepartmentRecord> = self
      .nodes
      .values()
      .filter(|d| !node.contains(d))
      .cloned()
      .collect();
    out.sort_by_key(|d| d.lft);
    Ok(out)
  }

  // ── Structural edits ──────────────────────────────────────────────────────

  /// Add a department with a store-assigned `id` under `parent_id`.
  pub fn insert(
    &mut self,
    id: DepartmentId,
    name: impl Into<String>,
    parent_id: Option<DepartmentId>,
  ) -> Result<DepartmentRecord> {
    if let Some(parent) = parent_id {
      self.require(parent)?;
    }
    if self.nodes.contains_key(&id) {
      return Err(Error::Conflict(format!("department {id} already exists")));
    }
    self.nodes.insert(id, DepartmentRecord {
      id,
      name: name.into(),
      parent_id,
      lft: 0,
      rgt: 1,
    });
    self.renumber()?;
    Ok(self.nodes[&id].clone())
  }

  /// Reparent `id` under `new_parent` (or make it a root).
  ///
  /// Fails with [`Error::Cycle`] when `new_parent` is `id` itself or one of
  /// its descendants; the tree is left untouched in that case.
  pub fn reparent(
    &mut self,
    id: DepartmentId,
    new_parent: Option<DepartmentId>,
  ) -> Result<DepartmentRecord> {
    self.require(id)?;
    if let Some(parent) = new_parent {
      self.require(parent)?;
      if self.lineage(parent).contains(&id) {
        return Err(Error::Cycle { id, parent });
      }
    }
    if let Some(node) = self.nodes.get_mut(&id) {
      node.parent_id = new_parent;
    }
    self.renumber()?;
    Ok(self.nodes[&id].clone())
  }

  pub fn rename(
    &mut self,
    id: DepartmentId,
    name: impl Into<String>,
  ) -> Result<DepartmentRecord> {
    self.require(id)?;
    if let Some(node) = self.nodes.get_mut(&id) {
      node.name = name.into();
    }
    self.renumber()?;
    Ok(self.nodes[&id].clone())
  }

  /// Remove a childless department and close the gap it leaves.
  pub fn remove(&mut self, id: DepartmentId) -> Result<DepartmentRecord> {
    self.require(id)?;
    if self.has_children(id) {
      return Err(Error::HasChildren(id));
    }
    let removed = self.nodes.remove(&id).ok_or(Error::DepartmentNotFound(id))?;
    self.renumber()?;
    Ok(removed)
  }

  /// `id` followed by every ancestor reachable through `parent_id` links.
  fn lineage(&self, id: DepartmentId) -> Vec<DepartmentId> {
    let mut out = vec![id];
    let mut cursor = self.nodes.get(&id).and_then(|d| d.parent_id);
    while let Some(next) = cursor {
      // Corrupt links could loop; the walk can never be longer than the tree.
      if out.len() > self.nodes.len() || out.contains(&next) {
        break;
      }
      out.push(next);
      cursor = self.nodes.get(&next).and_then(|d| d.parent_id);
    }
    out
  }

  /// Recompute every bound from the `parent_id` links.
  pub fn renumber(&mut self) -> Result<()> {
    let mut children: BTreeMap<Option<DepartmentId>, Vec<&DepartmentRecord>> =
      BTreeMap::new();
    for node in self.nodes.values() {
      if let Some(parent) = node.parent_id
        && !self.nodes.contains_key(&parent)
      {
        return Err(Error::DepartmentNotFound(parent));
      }
      children.entry(node.parent_id).or_default().push(node);
    }
    for siblings in children.values_mut() {
      siblings.sort_by_key(|d| sibling_key(d));
    }

    let mut bounds: BTreeMap<DepartmentId, (i64, i64)> = BTreeMap::new();
    let mut counter = 1;
    let mut stack: Vec<(DepartmentId, bool)> = children
      .get(&None)
      .map(|roots| roots.iter().rev().map(|d| (d.id, false)).collect())
      .unwrap_or_default();

    while let Some((id, entered)) = stack.pop() {
      if entered {
        if let Some(b) = bounds.get_mut(&id) {
          b.1 = counter;
        }
      } else {
        bounds.insert(id, (counter, counter));
        stack.push((id, true));
        if let Some(kids) = children.get(&Some(id)) {
          stack.extend(kids.iter().rev().map(|d| (d.id, false)));
        }
      }
      counter += 1;
    }

    if let Some(stray) = self.nodes.values().find(|d| !bounds.contains_key(&d.id)) {
      return Err(Error::Cycle {
        id:     stray.id,
        parent: stray.parent_id.unwrap_or(stray.id),
      });
    }

    for (id, (lft, rgt)) in bounds {
      if let Some(node) = self.nodes.get_mut(&id) {
        node.lft = lft;
        node.rgt = rgt;
      }
    }
    Ok(())
  }

  /// Records that are new or differ from their counterpart in `before`.
  pub fn changed_from(&self, before: &Self) -> Vec<&DepartmentRecord> {
    self
      .nodes
      .values()
      .filter(|d| before.nodes.get(&d.id) != Some(*d))
      .collect()
  }

  /// Check the nested-set invariant over the whole forest: `lft < rgt` for
  /// every node, no partial overlaps, and bounds agreeing with `parent_id`.
  pub fn is_consistent(&self) -> bool {
    let nodes: Vec<&DepartmentRecord> = self.nodes.values().collect();
    for a in &nodes {
      if a.lft >= a.rgt {
        return false;
      }
      for b in &nodes {
        if a.id == b.id {
          continue;
        }
        let nested = a.is_ancestor_of(b) || b.is_ancestor_of(a);
        let disjoint = a.rgt < b.lft || b.rgt < a.lft;
        if !(nested ^ disjoint) {
          return false;
        }
      }
      let parent_ok = match a.parent_id.and_then(|p| self.nodes.get(&p)) {
        Some(parent) => {
          parent.is_ancestor_of(a)
            && !nodes.iter().any(|m| parent.is_ancestor_of(m) && m.is_ancestor_of(a))
        }
        None => a.parent_id.is_none() && !nodes.iter().any(|m| m.is_ancestor_of(a)),
      };
      if !parent_ok {
        return false;
      }
    }
    true
  }
}

fn sibling_key(d: &DepartmentRecord) -> (String, DepartmentId) {
  (d.name.to_lowercase(), d.id)
}

// ─── Level walk ──────────────────────────────────────────────────────────────

/// Walk `departments` in pre-order, yielding each with its depth relative to
/// the roots of the walked set. Used for indented listings.
pub fn walk_with_level(
  departments: impl IntoIterator<Item = DepartmentRecord>,
) -> WalkWithLevel {
  let mut sorted: Vec<DepartmentRecord> = departments.into_iter().collect();
  sorted.sort_by_key(|d| (d.lft, d.id));
  WalkWithLevel {
    inner: sorted.into_iter(),
    open:  Vec::new(),
  }
}

/// Iterator returned by [`walk_with_level`].
pub struct WalkWithLevel {
  inner: std::vec::IntoIter<DepartmentRecord>,
  /// `rgt` bounds of the ancestors enclosing the current position.
  open:  Vec<i64>,
}

impl Iterator for WalkWithLevel {
  type Item = (DepartmentRecord, usize);

  fn next(&mut self) -> Option<Self::Item> {
    let department = self.inner.next()?;
    while self.open.last().is_some_and(|&rgt| rgt < department.lft) {
      self.open.pop();
    }
    let level = self.open.len();
    self.open.push(department.rgt);
    Some((department, level))
  }

  fn size_hint(&self) -> (usize, Option<usize>) { self.inner.size_hint() }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bounds(tree: &DepartmentTree, id: DepartmentId) -> (i64, i64) {
    let d = tree.get(id).unwrap();
    (d.lft, d.rgt)
  }

  fn names(records: &[DepartmentRecord]) -> Vec<&str> {
    records.iter().map(|d| d.name.as_str()).collect()
  }

  /// ```text
  ///     1   2
  ///    /|
  ///   3 4
  ///     |
  ///     5
  /// ```
  fn sample() -> DepartmentTree {
    let mut tree = DepartmentTree::default();
    tree.insert(1, "FBI department 1", None).unwrap();
    tree.insert(2, "FBI department 2", None).unwrap();
    tree.insert(3, "third", Some(1)).unwrap();
    tree.insert(4, "fourth", Some(1)).unwrap();
    tree.insert(5, "fifth", Some(4)).unwrap();
    tree
  }

  #[test]
  fn insert_shifts_bounds_after_insertion_point() {
    let mut tree = DepartmentTree::default();
    tree.insert(1, "D1", None).unwrap();
    tree.insert(2, "D2", Some(1)).unwrap();
    assert_eq!(bounds(&tree, 1), (1, 4));
    assert_eq!(bounds(&tree, 2), (2, 3));

    let d3 = tree.insert(3, "D3", Some(1)).unwrap();
    assert_eq!((d3.lft, d3.rgt), (4, 5));
    assert_eq!(bounds(&tree, 1), (1, 6));
    assert_eq!(bounds(&tree, 2), (2, 3));

    assert_eq!(names(&tree.subtree(1).unwrap()), vec!["D1", "D2", "D3"]);
  }

  #[test]
  fn insert_under_missing_parent_fails() {
    let mut tree = DepartmentTree::default();
    assert!(matches!(
      tree.insert(1, "orphan", Some(99)),
      Err(Error::DepartmentNotFound(99))
    ));
    assert!(tree.is_empty());
  }

  #[test]
  fn nested_set_structure() {
    let tree = sample();
    assert_eq!(bounds(&tree, 1), (1, 8));
    assert_eq!(bounds(&tree, 2), (9, 10));
    let (l4, r4) = bounds(&tree, 4);
    let (l5, r5) = bounds(&tree, 5);
    assert_eq!((l4, r4), (l5 - 1, r5 + 1));
    assert!(tree.is_consistent());
  }

  #[test]
  fn allowed_parents_exclude_own_subtree() {
    let tree = sample();
    let sorted = |id| {
      let mut n: Vec<String> =
        tree.allowed_parents(id).unwrap().into_iter().map(|d| d.name).collect();
      n.sort();
      n
    };
    assert_eq!(sorted(1), vec!["FBI department 2"]);
    assert_eq!(sorted(2), vec!["FBI department 1", "fifth", "fourth", "third"]);
    assert_eq!(sorted(4), vec!["FBI department 1", "FBI department 2", "third"]);
    assert_eq!(sorted(5), vec![
      "FBI department 1",
      "FBI department 2",
      "fourth",
      "third"
    ]);
  }

  #[test]
  fn move_into_own_subtree_is_a_cycle() {
    let mut tree = sample();
    let before = tree.clone().into_records();

    assert!(matches!(tree.reparent(1, Some(5)), Err(Error::Cycle { id: 1, parent: 5 })));
    assert!(matches!(tree.reparent(4, Some(4)), Err(Error::Cycle { .. })));
    assert_eq!(tree.clone().into_records(), before);
  }

  #[test]
  fn move_renumbers_and_keeps_invariant() {
    let mut tree = sample();
    tree.reparent(4, Some(2)).unwrap();
    assert!(tree.is_consistent());
    let moved = tree.get(5).unwrap().clone();
    assert!(tree.get(2).unwrap().is_ancestor_of(&moved));
    assert!(!tree.get(1).unwrap().is_ancestor_of(&moved));

    tree.reparent(5, None).unwrap();
    assert!(tree.get(5).unwrap().is_root());
    assert!(tree.is_consistent());
  }

  #[test]
  fn remove_requires_a_leaf_and_closes_the_gap() {
    let mut tree = sample();
    assert!(matches!(tree.remove(4), Err(Error::HasChildren(4))));

    tree.remove(5).unwrap();
    assert_eq!(bounds(&tree, 4), (2, 3));
    assert_eq!(bounds(&tree, 1), (1, 6));
    assert_eq!(bounds(&tree, 2), (7, 8));
    assert!(tree.is_consistent());
  }

  #[test]
  fn invariant_survives_a_mixed_sequence() {
    let mut tree = DepartmentTree::default();
    for id in 1..=12 {
      let parent = if id <= 3 { None } else { Some((id * 7) % (id - 1) + 1) };
      tree.insert(id, format!("dept {id:02}"), parent).unwrap();
      assert!(tree.is_consistent());
    }
    for (id, parent) in [(4, Some(2)), (7, None), (3, Some(12)), (12, Some(1))] {
      let _ = tree.reparent(id, parent);
      assert!(tree.is_consistent());
    }
    for id in [11, 10, 9] {
      let _ = tree.remove(id);
      assert!(tree.is_consistent());
    }
  }

  #[test]
  fn changed_from_reports_shifted_records_only() {
    let before = sample();
    let mut after = before.clone();
    after.insert(6, "zeta", Some(2)).unwrap();
    let mut changed: Vec<DepartmentId> =
      after.changed_from(&before).into_iter().map(|d| d.id).collect();
    changed.sort();
    assert_eq!(changed, vec![2, 6]);
  }

  #[test]
  fn walk_with_level_annotates_depth() {
    let tree = sample();
    let walked: Vec<(String, usize)> = walk_with_level(tree.into_records())
      .map(|(d, level)| (d.name, level))
      .collect();
    assert_eq!(walked, vec![
      ("FBI department 1".to_string(), 0),
      ("fourth".to_string(), 1),
      ("fifth".to_string(), 2),
      ("third".to_string(), 1),
      ("FBI department 2".to_string(), 0),
    ]);
  }

  #[test]
  fn walk_levels_are_relative_to_the_walked_set() {
    let tree = sample();
    let walked: Vec<usize> = walk_with_level(tree.subtree(4).unwrap())
      .map(|(_, level)| level)
      .collect();
    assert_eq!(walked, vec![0, 1]);
  }

  #[test]
  fn ancestors_are_outermost_first() {
    let tree = sample();
    assert_eq!(names(&tree.ancestors(5).unwrap()), vec!["FBI department 1", "fourth"]);
  }
}

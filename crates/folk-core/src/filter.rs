//! The field registry and the filter compiler.
//!
//! [`compile`] turns a stringly typed [`QuerySpec`] into a [`CompiledQuery`]:
//! every clause, sort key, group-by field and column is resolved against the
//! [`FieldRegistry`] up front, so evaluating the query afterwards cannot fail.
//! Department subtrees and relative dates are resolved at compile time too,
//! against the tree snapshot and the `today` passed in.

use std::{
  cmp::Ordering,
  collections::{BTreeMap, BTreeSet},
  str::FromStr,
};

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
  Error, Result,
  department::{DepartmentId, DepartmentTree},
  person::{Person, anniversary_in},
  principal::UserStatus,
  query::{FilterClause, QuerySpec, SortKey},
};

/// Prefix distinguishing custom fields from built-in ones, e.g. `cf_shirt_size`.
pub const CUSTOM_FIELD_PREFIX: &str = "cf_";

/// Columns shown when a spec selects none.
pub const DEFAULT_COLUMNS: &[&str] =
  &["lastname", "firstname", "mail", "phone", "department_id"];

// ─── Operators ───────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Operator {
  Equals,
  NotEquals,
  Contains,
  NotContains,
  WithinSubtree,
  Between,
  OnOrAfter,
  OnOrBefore,
  Today,
  ThisMonth,
  LastMonth,
  ThisYear,
  /// The field holds any value.
  #[strum(serialize = "any")]
  IsSet,
  /// The field is blank.
  #[strum(serialize = "none")]
  IsBlank,
}

// ─── Fields ──────────────────────────────────────────────────────────────────

/// How a field is filtered, and therefore which operators it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  Text,
  /// A small closed or open set of values compared exactly.
  Choice,
  Department,
  Group,
  Tags,
  Date,
  /// A date compared by month and day for relative operators (birthdays).
  RecurringDate,
  Boolean,
}

impl FieldKind {
  pub fn operators(self) -> &'static [Operator] {
    use Operator::*;
    match self {
      FieldKind::Text => &[Equals, NotEquals, Contains, NotContains, IsSet, IsBlank],
      FieldKind::Choice | FieldKind::Group => &[Equals, NotEquals],
      FieldKind::Department => &[Equals, NotEquals, WithinSubtree, IsSet, IsBlank],
      FieldKind::Tags => &[Equals, NotEquals, IsSet, IsBlank],
      FieldKind::Date | FieldKind::RecurringDate => &[
        Equals, Between, OnOrAfter, OnOrBefore, Today, ThisMonth, LastMonth,
        ThisYear, IsSet, IsBlank,
      ],
      FieldKind::Boolean => &[Equals],
    }
  }

  pub fn accepts(self, op: Operator) -> bool { self.operators().contains(&op) }
}

/// Built-in person fields known to the query layer.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum QueryField {
  Login,
  Firstname,
  Lastname,
  Middlename,
  Mail,
  Phone,
  Address,
  Skype,
  JobTitle,
  Company,
  Gender,
  Status,
  DepartmentId,
  Group,
  Tags,
  Birthday,
  AppearanceDate,
  CreatedOn,
  Admin,
}

impl QueryField {
  pub fn kind(self) -> FieldKind {
    use QueryField::*;
    match self {
      Login | Firstname | Lastname | Middlename | Mail | Phone | Address | Skype
      | JobTitle | Company => FieldKind::Text,
      Gender | Status => FieldKind::Choice,
      DepartmentId => FieldKind::Department,
      Group => FieldKind::Group,
      Tags => FieldKind::Tags,
      Birthday => FieldKind::RecurringDate,
      AppearanceDate | CreatedOn => FieldKind::Date,
      Admin => FieldKind::Boolean,
    }
  }

  fn sortable(self) -> bool { !matches!(self, QueryField::Group | QueryField::Tags) }

  fn groupable(self) -> bool {
    use QueryField::*;
    matches!(self, Status | DepartmentId | Gender | Company | JobTitle | Admin)
  }
}

/// A resolved field: built in, or a custom field by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
  Builtin(QueryField),
  Custom(String),
}

impl Attr {
  pub fn kind(&self) -> FieldKind {
    match self {
      Attr::Builtin(f) => f.kind(),
      Attr::Custom(_) => FieldKind::Text,
    }
  }

  fn sortable(&self) -> bool {
    match self {
      Attr::Builtin(f) => f.sortable(),
      Attr::Custom(_) => true,
    }
  }

  fn groupable(&self) -> bool {
    match self {
      Attr::Builtin(f) => f.groupable(),
      Attr::Custom(_) => true,
    }
  }

  fn extract(&self, p: &Person) -> Value {
    let info = &p.information;
    let field = match self {
      Attr::Builtin(field) => field,
      Attr::Custom(name) => {
        return Value::text(p.custom_fields.get(name).map(String::as_str));
      }
    };
    match field {
      QueryField::Login => Value::text(Some(p.login.as_str())),
      QueryField::Firstname => Value::text(Some(p.firstname.as_str())),
      QueryField::Lastname => Value::text(Some(p.lastname.as_str())),
      QueryField::Middlename => Value::text(info.middlename.as_deref()),
      QueryField::Mail => Value::text(p.mail.as_deref()),
      QueryField::Phone => Value::text(info.phone.as_deref()),
      QueryField::Address => Value::text(info.address.as_deref()),
      QueryField::Skype => Value::text(info.skype.as_deref()),
      QueryField::JobTitle => Value::text(info.job_title.as_deref()),
      QueryField::Company => Value::text(info.company.as_deref()),
      QueryField::Gender => Value::text(info.gender.as_deref()),
      QueryField::Status => Value::Text(p.status.to_string()),
      QueryField::DepartmentId => p.department_id.map_or(Value::Blank, Value::Id),
      QueryField::Group => Value::Ids(p.group_ids.clone()),
      QueryField::Tags => Value::Tags(p.tags.clone()),
      QueryField::Birthday => info.birthday.map_or(Value::Blank, Value::Date),
      QueryField::AppearanceDate => {
        info.appearance_date.map_or(Value::Blank, Value::Date)
      }
      QueryField::CreatedOn => Value::Date(p.created_at.date_naive()),
      QueryField::Admin => Value::Bool(p.admin),
    }
  }
}

/// Resolves field names, including the deployment's custom fields.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
  custom_fields: BTreeSet<String>,
}

impl FieldRegistry {
  pub fn new<I, S>(custom_fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      custom_fields: custom_fields.into_iter().map(Into::into).collect(),
    }
  }

  pub fn resolve(&self, name: &str) -> Option<Attr> {
    if let Some(custom) = name.strip_prefix(CUSTOM_FIELD_PREFIX) {
      return self
        .custom_fields
        .contains(custom)
        .then(|| Attr::Custom(custom.to_owned()));
    }
    QueryField::from_str(name).ok().map(Attr::Builtin)
  }

  /// Every filterable field name, built-ins first.
  pub fn field_names(&self) -> Vec<String> {
    QueryField::iter()
      .map(|f| f.to_string())
      .chain(
        self
          .custom_fields
          .iter()
          .map(|c| format!("{CUSTOM_FIELD_PREFIX}{c}")),
      )
      .collect()
  }
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// A field's value on one person. Variant order is the sort order across
/// kinds, so blanks sort first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Value {
  Blank,
  Bool(bool),
  Id(i64),
  Date(NaiveDate),
  Text(String),
  Ids(Vec<i64>),
  Tags(Vec<String>),
}

impl Value {
  fn text(s: Option<&str>) -> Self {
    match s.map(str::trim) {
      Some(s) if !s.is_empty() => Value::Text(s.to_owned()),
      _ => Value::Blank,
    }
  }

  fn is_blank(&self) -> bool {
    match self {
      Value::Blank => true,
      Value::Ids(ids) => ids.is_empty(),
      Value::Tags(tags) => tags.is_empty(),
      _ => false,
    }
  }

  fn to_json(&self) -> Json {
    match self {
      Value::Blank => Json::Null,
      Value::Bool(b) => Json::Bool(*b),
      Value::Id(id) => Json::from(*id),
      Value::Date(d) => Json::String(d.to_string()),
      Value::Text(s) => Json::String(s.clone()),
      Value::Ids(ids) => Json::from(ids.clone()),
      Value::Tags(tags) => Json::from(tags.clone()),
    }
  }
}

/// A bucket in a grouped count. Blank values get their own bucket.
/// Departments are keyed by id; their name is only a label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
  Blank,
  Department { id: DepartmentId, name: String },
  Value(String),
}

impl GroupKey {
  /// Display label; the blank bucket is labelled with the empty string.
  pub fn label(&self) -> &str {
    match self {
      GroupKey::Blank => "",
      GroupKey::Department { name, .. } => name,
      GroupKey::Value(v) => v,
    }
  }
}

// Serialised as a plain string so grouped counts can be JSON object keys.
// Department buckets use the id, which stays unique across equal names.
impl Serialize for GroupKey {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match self {
      GroupKey::Department { id, .. } => serializer.collect_str(id),
      other => serializer.serialize_str(other.label()),
    }
  }
}

// ─── Compiled conditions ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Test {
  Present(bool),
  /// Case-folded exact match against any of the values.
  TextIn { values: BTreeSet<String>, negate: bool },
  Contains { needle: String, negate: bool },
  IdIn { ids: BTreeSet<i64>, negate: bool },
  /// Shares any tag with `tags` (case-folded).
  TagsIn { tags: BTreeSet<String>, negate: bool },
  DateIn { from: Option<NaiveDate>, to: Option<NaiveDate>, recurring: bool },
  Bool(bool),
}

#[derive(Debug, Clone)]
struct Condition {
  attr: Attr,
  test: Test,
}

impl Condition {
  fn matches(&self, p: &Person) -> bool {
    let value = self.attr.extract(p);
    match &self.test {
      Test::Present(wanted) => value.is_blank() != *wanted,
      Test::TextIn { values, negate } => {
        let hit = match &value {
          Value::Text(s) => values.contains(&s.to_lowercase()),
          _ => false,
        };
        hit != *negate
      }
      Test::Contains { needle, negate } => {
        let hit = match &value {
          Value::Text(s) => s.to_lowercase().contains(needle),
          _ => false,
        };
        hit != *negate
      }
      Test::IdIn { ids, negate } => {
        let hit = match &value {
          Value::Id(id) => ids.contains(id),
          Value::Ids(held) => held.iter().any(|id| ids.contains(id)),
          _ => false,
        };
        hit != *negate
      }
      Test::TagsIn { tags, negate } => {
        let hit = match &value {
          Value::Tags(held) => held.iter().any(|t| tags.contains(&t.to_lowercase())),
          _ => false,
        };
        hit != *negate
      }
      Test::DateIn { from, to, recurring } => match value {
        Value::Date(d) if *recurring => recurs_within(d, *from, *to),
        Value::Date(d) => within(d, *from, *to),
        _ => false,
      },
      Test::Bool(wanted) => value == Value::Bool(*wanted),
    }
  }
}

fn within(d: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
  from.is_none_or(|f| f <= d) && to.is_none_or(|t| d <= t)
}

/// Does any anniversary of `d` fall in `[from, to]`?
fn recurs_within(d: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
  let (Some(from), Some(to)) = (from, to) else {
    return within(d, from, to);
  };
  (from.year()..=to.year())
    .filter_map(|y| anniversary_in(d, y))
    .any(|a| within(a, Some(from), Some(to)))
}

fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
  let first = NaiveDate::from_ymd_opt(year, month, 1)?;
  let last = first.checked_add_months(Months::new(1))?.checked_sub_days(Days::new(1))?;
  Some((first, last))
}

// ─── Compilation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
  Asc,
  Desc,
}

/// Department facts the compiled query needs after the tree is gone.
#[derive(Debug, Clone)]
struct DepartmentInfo {
  lft:  i64,
  name: String,
}

/// A validated query, ready to evaluate against person records.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
  conditions:  Vec<Condition>,
  search:      Vec<String>,
  sort:        Vec<(Attr, Direction)>,
  group_by:    Option<Attr>,
  columns:     Vec<(String, Attr)>,
  departments: BTreeMap<DepartmentId, DepartmentInfo>,
}

/// Validate `spec` and compile it.
pub fn compile(
  spec: &QuerySpec,
  registry: &FieldRegistry,
  tree: &DepartmentTree,
  today: NaiveDate,
) -> Result<CompiledQuery> {
  let conditions = spec
    .filters
    .iter()
    .map(|clause| compile_clause(clause, registry, tree, today))
    .collect::<Result<Vec<_>>>()?;

  let sort = if spec.sort.is_empty() {
    vec![
      (Attr::Builtin(QueryField::Lastname), Direction::Asc),
      (Attr::Builtin(QueryField::Firstname), Direction::Asc),
    ]
  } else {
    spec
      .sort
      .iter()
      .map(|key| compile_sort(key, registry))
      .collect::<Result<Vec<_>>>()?
  };

  let group_by = match spec.group_by.as_deref().map(str::trim) {
    None | Some("") => None,
    Some(name) => Some(
      registry
        .resolve(name)
        .filter(Attr::groupable)
        .ok_or_else(|| Error::InvalidGroupBy(name.to_owned()))?,
    ),
  };

  let names: Vec<&str> = if spec.columns.is_empty() {
    DEFAULT_COLUMNS.to_vec()
  } else {
    spec.columns.iter().map(String::as_str).collect()
  };
  let mut columns = Vec::with_capacity(names.len());
  for name in names {
    if name == "id" {
      continue;
    }
    let attr = registry
      .resolve(name)
      .ok_or_else(|| Error::InvalidColumn(name.to_owned()))?;
    columns.push((name.to_owned(), attr));
  }

  let search = spec
    .search
    .as_deref()
    .unwrap_or_default()
    .split_whitespace()
    .map(str::to_lowercase)
    .collect();

  let departments = tree
    .records()
    .into_iter()
    .map(|d| (d.id, DepartmentInfo { lft: d.lft, name: d.name.clone() }))
    .collect();

  Ok(CompiledQuery { conditions, search, sort, group_by, columns, departments })
}

fn compile_sort(key: &SortKey, registry: &FieldRegistry) -> Result<(Attr, Direction)> {
  let attr = registry
    .resolve(&key.field)
    .filter(Attr::sortable)
    .ok_or_else(|| Error::InvalidSort(format!("unknown sort field '{}'", key.field)))?;
  let direction = match key.direction.to_ascii_lowercase().as_str() {
    "asc" => Direction::Asc,
    "desc" => Direction::Desc,
    other => {
      return Err(Error::InvalidSort(format!("unknown direction '{other}'")));
    }
  };
  Ok((attr, direction))
}

fn compile_clause(
  clause: &FilterClause,
  registry: &FieldRegistry,
  tree: &DepartmentTree,
  today: NaiveDate,
) -> Result<Condition> {
  let invalid = |msg: &str| Error::InvalidFilter(format!("{}: {msg}", clause.field));

  let attr = registry
    .resolve(&clause.field)
    .ok_or_else(|| invalid("unknown field"))?;
  let op = Operator::from_str(&clause.operator)
    .map_err(|_| invalid(&format!("unknown operator '{}'", clause.operator)))?;
  let kind = attr.kind();
  if !kind.accepts(op) {
    return Err(invalid(&format!("operator '{op}' not allowed")));
  }

  let values: Vec<&str> = clause
    .values
    .iter()
    .map(|v| v.trim())
    .filter(|v| !v.is_empty())
    .collect();
  let need = |n: usize| {
    if values.len() < n {
      Err(invalid(&format!("operator '{op}' needs {n} value(s)")))
    } else {
      Ok(())
    }
  };

  let test = match (kind, op) {
    (_, Operator::IsSet) => Test::Present(true),
    (_, Operator::IsBlank) => Test::Present(false),

    (FieldKind::Text | FieldKind::Choice, Operator::Equals | Operator::NotEquals) => {
      need(1)?;
      if attr == Attr::Builtin(QueryField::Status) {
        for v in &values {
          UserStatus::from_str(&v.to_lowercase())
            .map_err(|_| invalid(&format!("unknown status '{v}'")))?;
        }
      }
      Test::TextIn {
        values: values.iter().map(|v| v.to_lowercase()).collect(),
        negate: op == Operator::NotEquals,
      }
    }
    (FieldKind::Text, Operator::Contains | Operator::NotContains) => {
      need(1)?;
      Test::Contains {
        needle: values[0].to_lowercase(),
        negate: op == Operator::NotContains,
      }
    }

    (FieldKind::Department | FieldKind::Group, _) => {
      need(1)?;
      let ids = values
        .iter()
        .map(|v| v.parse::<i64>().map_err(|_| invalid(&format!("'{v}' is not an id"))))
        .collect::<Result<Vec<_>>>()?;
      let ids = if op == Operator::WithinSubtree {
        let mut all = BTreeSet::new();
        for id in ids {
          all.extend(
            tree
              .subtree_ids(id)
              .map_err(|_| invalid(&format!("no department {id}")))?,
          );
        }
        all
      } else {
        ids.into_iter().collect()
      };
      Test::IdIn { ids, negate: op == Operator::NotEquals }
    }

    (FieldKind::Tags, _) => {
      need(1)?;
      Test::TagsIn {
        tags: values.iter().map(|v| v.to_lowercase()).collect(),
        negate: op == Operator::NotEquals,
      }
    }

    (FieldKind::Date | FieldKind::RecurringDate, _) => {
      let date = |v: &str| {
        NaiveDate::parse_from_str(v, "%Y-%m-%d")
          .map_err(|_| invalid(&format!("'{v}' is not a YYYY-MM-DD date")))
      };
      let bad_calendar = || invalid("date out of range");
      let (from, to, relative) = match op {
        Operator::Equals => {
          need(1)?;
          let d = date(values[0])?;
          (Some(d), Some(d), false)
        }
        Operator::Between => {
          need(2)?;
          (Some(date(values[0])?), Some(date(values[1])?), false)
        }
        Operator::OnOrAfter => {
          need(1)?;
          (Some(date(values[0])?), None, false)
        }
        Operator::OnOrBefore => {
          need(1)?;
          (None, Some(date(values[0])?), false)
        }
        Operator::Today => (Some(today), Some(today), true),
        Operator::ThisMonth => {
          let (f, t) = month_bounds(today.year(), today.month()).ok_or_else(bad_calendar)?;
          (Some(f), Some(t), true)
        }
        Operator::LastMonth => {
          let prev = today
            .with_day(1)
            .and_then(|d| d.checked_sub_months(Months::new(1)))
            .ok_or_else(bad_calendar)?;
          let (f, t) = month_bounds(prev.year(), prev.month()).ok_or_else(bad_calendar)?;
          (Some(f), Some(t), true)
        }
        Operator::ThisYear => {
          let f = NaiveDate::from_ymd_opt(today.year(), 1, 1).ok_or_else(bad_calendar)?;
          let t = NaiveDate::from_ymd_opt(today.year(), 12, 31).ok_or_else(bad_calendar)?;
          (Some(f), Some(t), true)
        }
        _ => return Err(invalid(&format!("operator '{op}' not allowed"))),
      };
      Test::DateIn {
        from,
        to,
        recurring: relative && kind == FieldKind::RecurringDate,
      }
    }

    (FieldKind::Boolean, _) => {
      need(1)?;
      let wanted = match values[0].to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        other => return Err(invalid(&format!("'{other}' is not a boolean"))),
      };
      Test::Bool(wanted)
    }

    _ => return Err(invalid(&format!("operator '{op}' not allowed"))),
  };

  Ok(Condition { attr, test })
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

impl CompiledQuery {
  /// Every clause and every search word matches.
  pub fn matches(&self, p: &Person) -> bool {
    self.conditions.iter().all(|c| c.matches(p)) && self.matches_search(p)
  }

  fn matches_search(&self, p: &Person) -> bool {
    if self.search.is_empty() {
      return true;
    }
    let mut haystack = vec![
      p.firstname.to_lowercase(),
      p.lastname.to_lowercase(),
      p.login.to_lowercase(),
    ];
    haystack.extend(p.information.middlename.as_deref().map(str::to_lowercase));
    haystack.extend(p.mail.as_deref().map(str::to_lowercase));
    haystack.extend(p.tags.iter().map(|t| t.to_lowercase()));
    self
      .search
      .iter()
      .all(|word| haystack.iter().any(|h| h.contains(word.as_str())))
  }

  /// Sort order over matching rows; ties end on id.
  pub fn compare(&self, a: &Person, b: &Person) -> Ordering {
    self
      .sort
      .iter()
      .map(|(attr, dir)| {
        let ord = self.sort_value(attr, a).cmp(&self.sort_value(attr, b));
        match dir {
          Direction::Asc => ord,
          Direction::Desc => ord.reverse(),
        }
      })
      .find(|o| o.is_ne())
      .unwrap_or_else(|| a.id.cmp(&b.id))
  }

  fn sort_value(&self, attr: &Attr, p: &Person) -> Value {
    match attr.extract(p) {
      Value::Text(s) => Value::Text(s.to_lowercase()),
      Value::Id(id) if *attr == Attr::Builtin(QueryField::DepartmentId) => self
        .departments
        .get(&id)
        .map_or(Value::Blank, |d| Value::Id(d.lft)),
      other => other,
    }
  }

  pub fn is_grouped(&self) -> bool { self.group_by.is_some() }

  /// The bucket `p` falls into, if the query is grouped.
  pub fn group_key(&self, p: &Person) -> Option<GroupKey> {
    let attr = self.group_by.as_ref()?;
    let key = match attr.extract(p) {
      Value::Blank => GroupKey::Blank,
      Value::Id(id) if *attr == Attr::Builtin(QueryField::DepartmentId) => {
        self
          .departments
          .get(&id)
          .map_or(GroupKey::Blank, |d| GroupKey::Department { id, name: d.name.clone() })
      }
      Value::Text(s) => GroupKey::Value(s),
      Value::Bool(b) => GroupKey::Value(b.to_string()),
      Value::Id(id) => GroupKey::Value(id.to_string()),
      Value::Date(d) => GroupKey::Value(d.to_string()),
      Value::Ids(_) | Value::Tags(_) => GroupKey::Blank,
    };
    Some(key)
  }

  /// Column names in output order, `id` excluded.
  pub fn columns(&self) -> Vec<&str> {
    self.columns.iter().map(|(name, _)| name.as_str()).collect()
  }

  /// `p` as a JSON object holding `id` and the selected columns.
  pub fn project(&self, p: &Person) -> Map<String, Json> {
    let mut row = Map::new();
    row.insert("id".into(), Json::from(p.id));
    for (name, attr) in &self.columns {
      row.insert(name.clone(), attr.extract(p).to_json());
    }
    row
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{person::tests::person, query::QuerySpec};

  fn today() -> NaiveDate { NaiveDate::from_ymd_opt(2026, 5, 14).unwrap() }

  fn tree() -> DepartmentTree {
    let mut tree = DepartmentTree::default();
    tree.insert(1, "Sales", None).unwrap();
    tree.insert(2, "Inside sales", Some(1)).unwrap();
    tree.insert(3, "Engineering", None).unwrap();
    tree
  }

  fn people() -> Vec<Person> {
    let mut hill = person(4, "Robert", "Hill");
    hill.department_id = Some(2);
    hill.tags = vec!["Climber".into(), "Manager".into()];
    hill.information.birthday = NaiveDate::from_ymd_opt(1980, 5, 30);
    hill.custom_fields.insert("shirt".into(), "XL".into());

    let mut smith = person(2, "John", "Smith");
    smith.department_id = Some(3);
    smith.information.job_title = Some("Engineer".into());

    let mut miller = person(3, "Dave", "Miller");
    miller.department_id = Some(1);
    miller.status = UserStatus::Locked;
    miller.information.birthday = NaiveDate::from_ymd_opt(1990, 1, 2);

    vec![hill, smith, miller]
  }

  fn run(spec: &QuerySpec) -> Vec<i64> {
    let registry = FieldRegistry::new(["shirt"]);
    let q = compile(spec, &registry, &tree(), today()).unwrap();
    let mut rows: Vec<Person> = people().into_iter().filter(|p| q.matches(p)).collect();
    rows.sort_by(|a, b| q.compare(a, b));
    rows.into_iter().map(|p| p.id).collect()
  }

  fn compile_err(spec: &QuerySpec) -> Error {
    compile(spec, &FieldRegistry::default(), &tree(), today()).unwrap_err()
  }

  #[test]
  fn default_sort_is_lastname_then_firstname() {
    assert_eq!(run(&QuerySpec::default()), vec![4, 3, 2]);
  }

  #[test]
  fn text_filters_are_case_insensitive() {
    let spec = QuerySpec::default().filter(FilterClause::new("lastname", "contains", ["hIl"]));
    assert_eq!(run(&spec), vec![4]);

    let spec =
      QuerySpec::default().filter(FilterClause::new("lastname", "not_equals", ["smith"]));
    assert_eq!(run(&spec), vec![4, 3]);
  }

  #[test]
  fn within_subtree_expands_descendants() {
    let spec =
      QuerySpec::default().filter(FilterClause::new("department_id", "within_subtree", ["1"]));
    assert_eq!(run(&spec), vec![4, 3]);

    let spec =
      QuerySpec::default().filter(FilterClause::new("department_id", "equals", ["1"]));
    assert_eq!(run(&spec), vec![3]);
  }

  #[test]
  fn tags_and_blank_operators() {
    let spec = QuerySpec::default().filter(FilterClause::new("tags", "equals", ["manager"]));
    assert_eq!(run(&spec), vec![4]);

    let spec =
      QuerySpec::default().filter(FilterClause::new("job_title", "none", Vec::<String>::new()));
    assert_eq!(run(&spec), vec![4, 3]);
  }

  #[test]
  fn birthdays_this_month_recur_every_year() {
    let spec =
      QuerySpec::default().filter(FilterClause::new("birthday", "this_month", Vec::<String>::new()));
    assert_eq!(run(&spec), vec![4]);

    let spec = QuerySpec::default()
      .filter(FilterClause::new("birthday", "between", ["1989-01-01", "1991-01-01"]));
    assert_eq!(run(&spec), vec![3]);
  }

  #[test]
  fn status_and_custom_fields() {
    let spec = QuerySpec::default().filter(FilterClause::new("status", "equals", ["locked"]));
    assert_eq!(run(&spec), vec![3]);

    let spec = QuerySpec::default().filter(FilterClause::new("cf_shirt", "equals", ["xl"]));
    assert_eq!(run(&spec), vec![4]);
  }

  #[test]
  fn search_matches_every_word() {
    assert_eq!(run(&QuerySpec::default().searching("robert")), vec![4]);
    assert_eq!(run(&QuerySpec::default().searching("climber ROB")), vec![4]);
    assert_eq!(run(&QuerySpec::default().searching("john hill")), Vec::<i64>::new());
  }

  #[test]
  fn explicit_sort_with_department_order() {
    let spec = QuerySpec::default().sorted_by(SortKey::asc("department_id"));
    // Engineering (1,2) sorts before Sales (3,6) and its child (4,5).
    assert_eq!(run(&spec), vec![2, 3, 4]);

    let spec = QuerySpec::default().sorted_by(SortKey::desc("firstname"));
    assert_eq!(run(&spec), vec![4, 2, 3]);
  }

  #[test]
  fn invalid_specs_are_rejected() {
    let bad = |clause| compile_err(&QuerySpec::default().filter(clause));
    assert!(matches!(bad(FilterClause::new("shoe", "equals", ["x"])), Error::InvalidFilter(_)));
    assert!(matches!(
      bad(FilterClause::new("lastname", "between", ["a", "b"])),
      Error::InvalidFilter(_)
    ));
    assert!(matches!(
      bad(FilterClause::new("birthday", "equals", ["May 3rd"])),
      Error::InvalidFilter(_)
    ));
    assert!(matches!(bad(FilterClause::new("status", "equals", ["gone"])), Error::InvalidFilter(_)));
    assert!(matches!(
      bad(FilterClause::new("department_id", "within_subtree", ["99"])),
      Error::InvalidFilter(_)
    ));

    let spec = QuerySpec::default().sorted_by(SortKey::asc("tags"));
    assert!(matches!(compile_err(&spec), Error::InvalidSort(_)));
    let spec = QuerySpec::default().sorted_by(SortKey {
      field:     "lastname".into(),
      direction: "sideways".into(),
    });
    assert!(matches!(compile_err(&spec), Error::InvalidSort(_)));

    let spec = QuerySpec::default().grouped_by("mail");
    assert!(matches!(compile_err(&spec), Error::InvalidGroupBy(_)));

    let spec = QuerySpec { columns: vec!["shoe_size".into()], ..QuerySpec::default() };
    assert!(matches!(compile_err(&spec), Error::InvalidColumn(_)));
  }

  #[test]
  fn grouping_uses_department_names_and_a_blank_bucket() {
    let registry = FieldRegistry::default();
    let q = compile(
      &QuerySpec::default().grouped_by("department_id"),
      &registry,
      &tree(),
      today(),
    )
    .unwrap();
    let mut nobody = person(9, "No", "Body");
    nobody.department_id = None;
    assert_eq!(
      q.group_key(&people()[0]),
      Some(GroupKey::Department { id: 2, name: "Inside sales".into() })
    );
    assert_eq!(q.group_key(&nobody), Some(GroupKey::Blank));
  }

  #[test]
  fn same_named_departments_group_apart() {
    let mut tree = tree();
    tree.insert(4, "Support", Some(1)).unwrap();
    tree.insert(5, "Support", Some(3)).unwrap();
    let q = compile(
      &QuerySpec::default().grouped_by("department_id"),
      &FieldRegistry::default(),
      &tree,
      today(),
    )
    .unwrap();

    let mut a = person(6, "Ann", "Able");
    a.department_id = Some(4);
    let mut b = person(7, "Bob", "Baker");
    b.department_id = Some(5);
    let (ka, kb) = (q.group_key(&a).unwrap(), q.group_key(&b).unwrap());
    assert_ne!(ka, kb);
    assert_eq!(ka.label(), kb.label());
    assert_eq!(serde_json::to_string(&ka).unwrap(), "\"4\"");
  }

  #[test]
  fn projection_always_carries_the_id() {
    let spec = QuerySpec {
      columns: vec!["lastname".into(), "tags".into()],
      ..QuerySpec::default()
    };
    let q = compile(&spec, &FieldRegistry::default(), &tree(), today()).unwrap();
    let row = q.project(&people()[0]);
    assert_eq!(row["id"], Json::from(4));
    assert_eq!(row["lastname"], Json::from("Hill"));
    assert_eq!(row["tags"], Json::from(vec!["Climber", "Manager"]));
    assert_eq!(q.columns(), vec!["lastname", "tags"]);
  }
}

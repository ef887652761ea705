//! Person records: user principals carrying directory attributes.
//!
//! Writes to a person go through [`PersonUpdate::apply_to`], which splits the
//! touched fields by [`FieldAccess`] class. The caller decides which classes
//! the editor may write; everything else is reported back as ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
  Error, Result,
  department::DepartmentId,
  principal::{PrincipalId, UserStatus},
};

// ─── Directory information ───────────────────────────────────────────────────

/// Directory attributes beyond the account itself. Stored alongside the
/// person; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeopleInformation {
  pub middlename:      Option<String>,
  pub phone:           Option<String>,
  pub address:         Option<String>,
  pub skype:           Option<String>,
  pub birthday:        Option<NaiveDate>,
  pub job_title:       Option<String>,
  pub company:         Option<String>,
  pub gender:          Option<String>,
  pub twitter:         Option<String>,
  pub facebook:        Option<String>,
  pub linkedin:        Option<String>,
  pub background:      Option<String>,
  /// The date the person joined the organisation.
  pub appearance_date: Option<NaiveDate>,
}

impl PeopleInformation {
  pub fn is_empty(&self) -> bool { self == &Self::default() }
}

// ─── Person ──────────────────────────────────────────────────────────────────

/// A user principal with its directory attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
  pub id:            PrincipalId,
  pub login:         String,
  pub firstname:     String,
  pub lastname:      String,
  pub mail:          Option<String>,
  pub admin:         bool,
  pub status:        UserStatus,
  pub department_id: Option<DepartmentId>,
  /// Groups this person belongs to; maintained by the store.
  pub group_ids:     Vec<PrincipalId>,
  pub information:   PeopleInformation,
  /// Normalised: trimmed, deduplicated, sorted.
  pub tags:          Vec<String>,
  pub custom_fields: BTreeMap<String, String>,
  pub created_at:    DateTime<Utc>,
}

impl Person {
  /// Display name, `"firstname lastname"`.
  pub fn name(&self) -> String {
    match (self.firstname.is_empty(), self.lastname.is_empty()) {
      (false, false) => format!("{} {}", self.firstname, self.lastname),
      (false, true) => self.firstname.clone(),
      (true, false) => self.lastname.clone(),
      (true, true) => self.login.clone(),
    }
  }

  pub fn is_active(&self) -> bool { self.status == UserStatus::Active }

  pub fn is_anonymous(&self) -> bool { self.status == UserStatus::Anonymous }

  /// Completed years of age on `today`, if the birthday is known.
  pub fn age(&self, today: NaiveDate) -> Option<u32> {
    today.years_since(self.information.birthday?)
  }

  /// The first occurrence of the birthday on or after `today`.
  ///
  /// A 29 February birthday falls on 1 March in non-leap years.
  pub fn next_birthday(&self, today: NaiveDate) -> Option<NaiveDate> {
    let birthday = self.information.birthday?;
    let this_year = anniversary_in(birthday, today.year())?;
    if this_year >= today {
      Some(this_year)
    } else {
      anniversary_in(birthday, today.year() + 1)
    }
  }
}

pub(crate) fn anniversary_in(date: NaiveDate, year: i32) -> Option<NaiveDate> {
  NaiveDate::from_ymd_opt(year, date.month(), date.day())
    .or_else(|| NaiveDate::from_ymd_opt(year, 3, 1))
}

// ─── Creation ────────────────────────────────────────────────────────────────

/// Input to [`crate::store::DirectoryStore::add_person`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPerson {
  pub login:         String,
  pub firstname:     String,
  pub lastname:      String,
  pub mail:          Option<String>,
  #[serde(default)]
  pub admin:         bool,
  #[serde(default)]
  pub status:        UserStatus,
  pub department_id: Option<DepartmentId>,
  #[serde(default)]
  pub information:   PeopleInformation,
  #[serde(default)]
  pub tags:          Vec<String>,
  #[serde(default)]
  pub custom_fields: BTreeMap<String, String>,
}

impl NewPerson {
  pub fn new(
    login: impl Into<String>,
    firstname: impl Into<String>,
    lastname: impl Into<String>,
  ) -> Self {
    Self {
      login: login.into(),
      firstname: firstname.into(),
      lastname: lastname.into(),
      ..Self::default()
    }
  }

  /// Reject records the store must never hold.
  pub fn validate(&self) -> Result<()> {
    if self.login.trim().is_empty() {
      return Err(Error::InvalidRecord("login must not be blank".into()));
    }
    if self.firstname.trim().is_empty() && self.lastname.trim().is_empty() {
      return Err(Error::InvalidRecord(
        "a person needs a first or last name".into(),
      ));
    }
    Ok(())
  }
}

// ─── Field access classes ────────────────────────────────────────────────────

/// Who may write a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
  /// Writable by the owner of the record, or by anyone holding an explicit
  /// `edit_people` grant.
  SelfEditable,
  /// Writable only with an explicit `edit_people` grant.
  Privileged,
  /// Writable only by administrators.
  AdminOnly,
  /// Writable only with `manage_tags`.
  Tags,
}

/// Every writable person field.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display,
  EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PersonField {
  Login,
  Firstname,
  Lastname,
  Middlename,
  Mail,
  Admin,
  Status,
  DepartmentId,
  Phone,
  Address,
  Skype,
  Birthday,
  JobTitle,
  Company,
  Gender,
  Twitter,
  Facebook,
  Linkedin,
  Background,
  AppearanceDate,
  Tags,
  CustomFields,
}

impl PersonField {
  pub fn access(self) -> FieldAccess {
    match self {
      Self::Firstname
      | Self::Lastname
      | Self::Middlename
      | Self::Mail
      | Self::Phone
      | Self::Address
      | Self::Skype
      | Self::Birthday
      | Self::Gender
      | Self::Twitter
      | Self::Facebook
      | Self::Linkedin
      | Self::Background => FieldAccess::SelfEditable,
      Self::Login
      | Self::Status
      | Self::DepartmentId
      | Self::JobTitle
      | Self::Company
      | Self::AppearanceDate
      | Self::CustomFields => FieldAccess::Privileged,
      Self::Admin => FieldAccess::AdminOnly,
      Self::Tags => FieldAccess::Tags,
    }
  }
}

// ─── Update ──────────────────────────────────────────────────────────────────

/// A partial update. `None` leaves a field untouched; a blank string clears
/// an optional text field. Double options clear nullable references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonUpdate {
  pub login:           Option<String>,
  pub firstname:       Option<String>,
  pub lastname:        Option<String>,
  pub middlename:      Option<String>,
  pub mail:            Option<String>,
  pub admin:           Option<bool>,
  pub status:          Option<UserStatus>,
  pub department_id:   Option<Option<DepartmentId>>,
  pub phone:           Option<String>,
  pub address:         Option<String>,
  pub skype:           Option<String>,
  pub birthday:        Option<Option<NaiveDate>>,
  pub job_title:       Option<String>,
  pub company:         Option<String>,
  pub gender:          Option<String>,
  pub twitter:         Option<String>,
  pub facebook:        Option<String>,
  pub linkedin:        Option<String>,
  pub background:      Option<String>,
  pub appearance_date: Option<Option<NaiveDate>>,
  pub tags:            Option<Vec<String>>,
  pub custom_fields:   Option<BTreeMap<String, String>>,
}

/// Which touched fields were written and which were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
  pub applied: Vec<PersonField>,
  pub ignored: Vec<PersonField>,
}

impl UpdateOutcome {
  pub fn is_noop(&self) -> bool { self.applied.is_empty() }
}

macro_rules! write_field {
  ($outcome:ident, $permits:ident, $field:expr, $value:expr => $target:expr) => {
    if let Some(value) = $value {
      if $permits($field) {
        $target = value;
        $outcome.applied.push($field);
      } else {
        $outcome.ignored.push($field);
      }
    }
  };
}

impl PersonUpdate {
  /// Write every touched field that `permits` allows into `person`.
  pub fn apply_to(
    self,
    person: &mut Person,
    mut permits: impl FnMut(PersonField) -> bool,
  ) -> UpdateOutcome {
    let mut out = UpdateOutcome::default();
    let info = &mut person.information;

    write_field!(out, permits, PersonField::Login, self.login => person.login);
    write_field!(out, permits, PersonField::Firstname, self.firstname => person.firstname);
    write_field!(out, permits, PersonField::Lastname, self.lastname => person.lastname);
    write_field!(out, permits, PersonField::Middlename, self.middlename.map(blank_to_none) => info.middlename);
    write_field!(out, permits, PersonField::Mail, self.mail.map(blank_to_none) => person.mail);
    write_field!(out, permits, PersonField::Admin, self.admin => person.admin);
    write_field!(out, permits, PersonField::Status, self.status => person.status);
    write_field!(out, permits, PersonField::DepartmentId, self.department_id => person.department_id);
    write_field!(out, permits, PersonField::Phone, self.phone.map(blank_to_none) => info.phone);
    write_field!(out, permits, PersonField::Address, self.address.map(blank_to_none) => info.address);
    write_field!(out, permits, PersonField::Skype, self.skype.map(blank_to_none) => info.skype);
    write_field!(out, permits, PersonField::Birthday, self.birthday => info.birthday);
    write_field!(out, permits, PersonField::JobTitle, self.job_title.map(blank_to_none) => info.job_title);
    write_field!(out, permits, PersonField::Company, self.company.map(blank_to_none) => info.company);
    write_field!(out, permits, PersonField::Gender, self.gender.map(blank_to_none) => info.gender);
    write_field!(out, permits, PersonField::Twitter, self.twitter.map(blank_to_none) => info.twitter);
    write_field!(out, permits, PersonField::Facebook, self.facebook.map(blank_to_none) => info.facebook);
    write_field!(out, permits, PersonField::Linkedin, self.linkedin.map(blank_to_none) => info.linkedin);
    write_field!(out, permits, PersonField::Background, self.background.map(blank_to_none) => info.background);
    write_field!(out, permits, PersonField::AppearanceDate, self.appearance_date => info.appearance_date);
    write_field!(out, permits, PersonField::Tags, self.tags.map(normalize_tags) => person.tags);
    write_field!(out, permits, PersonField::CustomFields, self.custom_fields => person.custom_fields);

    out
  }

  /// Fields this update would write, in declaration order.
  pub fn touched(&self) -> Vec<PersonField> {
    let mut scratch = Person {
      id:            0,
      login:         String::new(),
      firstname:     String::new(),
      lastname:      String::new(),
      mail:          None,
      admin:         false,
      status:        UserStatus::default(),
      department_id: None,
      group_ids:     Vec::new(),
      information:   PeopleInformation::default(),
      tags:          Vec::new(),
      custom_fields: BTreeMap::new(),
      created_at:    DateTime::<Utc>::MIN_UTC,
    };
    self.clone().apply_to(&mut scratch, |_| true).applied
  }
}

fn blank_to_none(value: String) -> Option<String> {
  let trimmed = value.trim();
  if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) }
}

/// Trim, drop blanks, deduplicate and sort.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
  let mut out: Vec<String> = tags
    .into_iter()
    .map(|t| t.trim().to_owned())
    .filter(|t| !t.is_empty())
    .collect();
  out.sort();
  out.dedup();
  out
}

/// Parse a comma-separated tag list such as `"Tag1, Tag2"`.
pub fn parse_tag_list(list: &str) -> Vec<String> {
  normalize_tags(list.split(',').map(str::to_owned).collect())
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub(crate) fn person(id: PrincipalId, first: &str, last: &str) -> Person {
    Person {
      id,
      login: format!("{}{}", first.to_lowercase(), id),
      firstname: first.into(),
      lastname: last.into(),
      mail: Some(format!("{}@example.com", first.to_lowercase())),
      admin: false,
      status: UserStatus::Active,
      department_id: None,
      group_ids: Vec::new(),
      information: PeopleInformation::default(),
      tags: Vec::new(),
      custom_fields: BTreeMap::new(),
      created_at: DateTime::<Utc>::MIN_UTC,
    }
  }

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn self_editable_fields_pass_privileged_fields_are_ignored() {
    let mut p = person(4, "Robert", "Hill");
    let update = PersonUpdate {
      phone: Some("89555555555".into()),
      department_id: Some(Some(2)),
      ..PersonUpdate::default()
    };

    let outcome = update
      .apply_to(&mut p, |f| f.access() == FieldAccess::SelfEditable);

    assert_eq!(outcome.applied, vec![PersonField::Phone]);
    assert_eq!(outcome.ignored, vec![PersonField::DepartmentId]);
    assert_eq!(p.information.phone.as_deref(), Some("89555555555"));
    assert_eq!(p.department_id, None);
  }

  #[test]
  fn blank_string_clears_optional_field() {
    let mut p = person(1, "Ann", "Lee");
    p.information.skype = Some("ann.lee".into());
    let update = PersonUpdate {
      skype: Some("   ".into()),
      ..PersonUpdate::default()
    };
    update.apply_to(&mut p, |_| true);
    assert_eq!(p.information.skype, None);
  }

  #[test]
  fn tags_are_normalised() {
    assert_eq!(parse_tag_list("Tag2, Tag1,, Tag2 "), vec!["Tag1", "Tag2"]);
  }

  #[test]
  fn touched_lists_only_set_fields() {
    let update = PersonUpdate {
      firstname: Some("newName".into()),
      tags: Some(vec!["x".into()]),
      ..PersonUpdate::default()
    };
    assert_eq!(update.touched(), vec![PersonField::Firstname, PersonField::Tags]);
  }

  #[test]
  fn next_birthday_rolls_over_and_handles_leap_day() {
    let mut p = person(1, "Ann", "Lee");
    p.information.birthday = Some(date(1990, 3, 10));
    assert_eq!(p.next_birthday(date(2024, 3, 10)), Some(date(2024, 3, 10)));
    assert_eq!(p.next_birthday(date(2024, 3, 11)), Some(date(2025, 3, 10)));
    assert_eq!(p.age(date(2024, 3, 9)), Some(33));
    assert_eq!(p.age(date(2024, 3, 10)), Some(34));

    p.information.birthday = Some(date(2000, 2, 29));
    assert_eq!(p.next_birthday(date(2023, 1, 1)), Some(date(2023, 3, 1)));
  }

  #[test]
  fn new_person_requires_login_and_a_name() {
    assert!(NewPerson::new("", "A", "B").validate().is_err());
    assert!(NewPerson::new("ab", "", " ").validate().is_err());
    assert!(NewPerson::new("ab", "A", "").validate().is_ok());
  }
}

//! Principals, the actors of the directory: individual users and groups.
//!
//! A user principal is always represented by its full [`Person`] record; the
//! directory has no user without directory attributes.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::person::Person;

pub type PrincipalId = i64;

/// Discriminates the two principal variants.
///
/// The derived ordering (groups before users) is the order used by
/// administrative listings.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PrincipalKind {
  Group,
  User,
}

/// Account status of a user principal.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
  Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserStatus {
  #[default]
  Active,
  Registered,
  Locked,
  Anonymous,
}

/// A named set of users. Grants held by a group are inherited by its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub id:         PrincipalId,
  pub name:       String,
  pub member_ids: Vec<PrincipalId>,
}

/// Either kind of principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
  User(Person),
  Group(Group),
}

impl Principal {
  pub fn id(&self) -> PrincipalId {
    match self {
      Self::User(p) => p.id,
      Self::Group(g) => g.id,
    }
  }

  pub fn kind(&self) -> PrincipalKind {
    match self {
      Self::User(_) => PrincipalKind::User,
      Self::Group(_) => PrincipalKind::Group,
    }
  }

  pub fn summary(&self) -> PrincipalSummary {
    match self {
      Self::User(p) => PrincipalSummary {
        id:   p.id,
        kind: PrincipalKind::User,
        name: p.name(),
      },
      Self::Group(g) => PrincipalSummary {
        id:   g.id,
        kind: PrincipalKind::Group,
        name: g.name.clone(),
      },
    }
  }
}

/// Identity and display name of a principal, without the full record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSummary {
  pub id:   PrincipalId,
  pub kind: PrincipalKind,
  pub name: String,
}

impl PrincipalSummary {
  /// Sort key for administrative listings: kind, then display name, then id.
  pub fn listing_key(&self) -> (PrincipalKind, String, PrincipalId) {
    (self.kind, self.name.to_lowercase(), self.id)
  }
}

impl fmt::Display for PrincipalSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      PrincipalKind::Group => write!(f, "group: {}", self.name),
      PrincipalKind::User => f.write_str(&self.name),
    }
  }
}

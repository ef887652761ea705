//! Runtime configuration for the `folk` binary.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use folk_core::{
  filter::FieldRegistry,
  membership::{ProjectId, RoleId, RoleVisibility, StaticMemberships},
  principal::PrincipalId,
  visibility::VisibilityConfig,
};
use serde::Deserialize;

/// Deserialised from `folk.toml` and `FOLK_*` environment variables.
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
  #[serde(default = "default_store_path")]
  pub store_path:              PathBuf,
  /// Legacy numeric directory-visibility setting; above zero opens the
  /// directory to every active user.
  #[serde(default)]
  pub visibility:              i64,
  #[serde(default)]
  pub default_role_visibility: RoleVisibility,
  /// Names of the custom fields queries may reference as `cf_<name>`.
  #[serde(default)]
  pub custom_fields:           Vec<String>,
  #[serde(default)]
  pub roles:                   Vec<RoleConfig>,
  #[serde(default)]
  pub memberships:             Vec<MembershipConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RoleConfig {
  pub id:         RoleId,
  pub visibility: RoleVisibility,
}

#[derive(Debug, Deserialize)]
pub struct MembershipConfig {
  pub principal_id: PrincipalId,
  pub project_id:   ProjectId,
  pub role_id:      RoleId,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/folk/folk.db") }

impl AdminConfig {
  /// Layer the optional TOML file at `path` under the environment.
  pub fn load(path: PathBuf) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("FOLK"))
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise AdminConfig")
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  pub fn visibility(&self) -> VisibilityConfig {
    VisibilityConfig {
      default_role_visibility: self.default_role_visibility,
      ..VisibilityConfig::from_threshold(self.visibility)
    }
  }

  pub fn registry(&self) -> FieldRegistry { FieldRegistry::new(self.custom_fields.iter().cloned()) }

  pub fn memberships(&self) -> StaticMemberships {
    let mut table = self
      .roles
      .iter()
      .fold(StaticMemberships::new(), |t, r| t.with_role(r.id, r.visibility));
    for m in &self.memberships {
      table.add_member(m.principal_id, m.project_id, m.role_id);
    }
    table
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(toml: &str) -> AdminConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn defaults_apply_to_an_empty_file() {
    let cfg = parse("");
    assert_eq!(cfg.visibility(), VisibilityConfig::default());
    assert!(cfg.custom_fields.is_empty());
    assert!(cfg.store_path.ends_with("folk.db"));
  }

  #[test]
  fn threshold_and_role_tables() {
    let cfg = parse(
      r#"
      store_path = "/tmp/folk.db"
      visibility = 1
      default_role_visibility = "members_of_visible_projects"
      custom_fields = ["shirt"]

      [[roles]]
      id = 3
      visibility = "all"

      [[memberships]]
      principal_id = 7
      project_id = 1
      role_id = 3
      "#,
    );
    let vis = cfg.visibility();
    assert!(vis.directory_visibility);
    assert_eq!(vis.default_role_visibility, RoleVisibility::MembersOfVisibleProjects);
    assert_eq!(cfg.store_path(), PathBuf::from("/tmp/folk.db"));
    assert!(cfg.registry().resolve("cf_shirt").is_some());
    assert_eq!(cfg.memberships.len(), 1);
  }

  #[test]
  fn tilde_expands_against_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/x.db")), PathBuf::from(home).join("x.db"));
    assert_eq!(expand_tilde(Path::new("/abs.db")), PathBuf::from("/abs.db"));
  }
}

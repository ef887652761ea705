//! Subcommands of the `folk` binary. Every command prints its result as
//! JSON on stdout.

use anyhow::{Context as _, bail};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use folk_core::{
  acl::{AclEntryId, Permission},
  department::{DepartmentId, walk_with_level},
  directory::Directory,
  membership::StaticMemberships,
  person::{NewPerson, Person, PersonUpdate, parse_tag_list},
  principal::PrincipalId,
  query::{QueryId, QuerySpec},
  store::DirectoryStore,
};
use folk_store_sqlite::SqliteStore;
use serde::Serialize;
use serde_json::json;
use tracing::info;

pub type Folk = Directory<SqliteStore, StaticMemberships>;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Department tree maintenance.
  #[command(subcommand)]
  Departments(DepartmentCommand),
  /// Permission grants.
  #[command(subcommand)]
  Acl(AclCommand),
  /// Groups and their members.
  #[command(subcommand)]
  Groups(GroupCommand),
  /// People records and listings.
  #[command(subcommand)]
  People(PeopleCommand),
  /// Saved people queries.
  #[command(subcommand)]
  Queries(QueryCommand),
}

#[derive(Subcommand, Debug)]
pub enum DepartmentCommand {
  /// Print the tree in pre-order with depths.
  Tree,
  /// A department and its descendants.
  Subtree {
    id: DepartmentId,
  },
  /// Departments a department may be moved under.
  Parents {
    id: DepartmentId,
  },
  Add {
    name:   String,
    #[arg(long)]
    parent: Option<DepartmentId>,
  },
  /// Reparent a department; omit `--parent` to make it a root.
  Mv {
    id:     DepartmentId,
    #[arg(long)]
    parent: Option<DepartmentId>,
  },
  Rename {
    id:   DepartmentId,
    name: String,
  },
  Rm {
    id: DepartmentId,
  },
  /// People assigned to a department.
  Members {
    id:      DepartmentId,
    /// Include people of descendant departments.
    #[arg(long)]
    subtree: bool,
  },
  Assign {
    id:     DepartmentId,
    person: PrincipalId,
  },
  Unassign {
    id:     DepartmentId,
    person: PrincipalId,
  },
}

#[derive(Subcommand, Debug)]
pub enum AclCommand {
  Grant {
    principal:   PrincipalId,
    #[arg(required = true)]
    permissions: Vec<String>,
  },
  Revoke {
    entry: AclEntryId,
  },
  /// Every principal holding a grant, groups first.
  List,
  /// Permissions granted directly to one principal.
  Show {
    principal: PrincipalId,
  },
  /// The names accepted by `grant`.
  Permissions,
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
  Add { name: String },
  List,
  Join { group: PrincipalId, user: PrincipalId },
  Leave { group: PrincipalId, user: PrincipalId },
}

#[derive(Args, Debug)]
pub struct NewPersonArgs {
  login:      String,
  firstname:  String,
  lastname:   String,
  #[arg(long)]
  mail:       Option<String>,
  #[arg(long)]
  department: Option<DepartmentId>,
  /// Comma-separated tag list.
  #[arg(long)]
  tags:       Option<String>,
}

impl NewPersonArgs {
  fn into_new_person(self) -> NewPerson {
    NewPerson {
      mail: self.mail,
      department_id: self.department,
      tags: self.tags.as_deref().map(parse_tag_list).unwrap_or_default(),
      ..NewPerson::new(self.login, self.firstname, self.lastname)
    }
  }
}

#[derive(Subcommand, Debug)]
pub enum PeopleCommand {
  Add(NewPersonArgs),
  /// Create the first administrator. Refused once one exists.
  BootstrapAdmin(NewPersonArgs),
  Show { id: PrincipalId },
  /// Apply a JSON-encoded partial update.
  Update {
    id:     PrincipalId,
    #[arg(long)]
    json:   String,
  },
  Rm { id: PrincipalId },
  /// Run a people query.
  Query {
    /// JSON-encoded query spec.
    #[arg(long)]
    spec:   Option<String>,
    /// Run a saved query instead.
    #[arg(long, conflicts_with = "spec")]
    saved:  Option<QueryId>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 25)]
    limit:  i64,
    #[arg(long, default_value_t = 0)]
    offset: i64,
  },
  /// Upcoming birthdays.
  Birthdays {
    #[arg(long, default_value_t = 30)]
    days: u64,
    /// Count from this date (YYYY-MM-DD) instead of today.
    #[arg(long)]
    at:   Option<NaiveDate>,
  },
  /// Most recently joined people.
  Newcomers {
    #[arg(long, default_value_t = 5)]
    limit: usize,
  },
}

#[derive(Subcommand, Debug)]
pub enum QueryCommand {
  /// Save a JSON-encoded query spec; it must carry a name.
  Save {
    #[arg(long)]
    json: String,
  },
  Update {
    id:   QueryId,
    #[arg(long)]
    json: String,
  },
  List,
  Rm { id: QueryId },
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> anyhow::Result<T> {
  serde_json::from_str(raw).with_context(|| format!("invalid {what} JSON"))
}

impl Command {
  pub async fn run(self, folk: &Folk, actor: Option<&Person>) -> anyhow::Result<()> {
    match self {
      Self::Departments(cmd) => cmd.run(folk, actor).await,
      Self::Acl(cmd) => cmd.run(folk, actor).await,
      Self::Groups(cmd) => cmd.run(folk, actor).await,
      Self::People(cmd) => cmd.run(folk, actor).await,
      Self::Queries(cmd) => cmd.run(folk, actor).await,
    }
  }
}

impl DepartmentCommand {
  async fn run(self, folk: &Folk, actor: Option<&Person>) -> anyhow::Result<()> {
    match self {
      Self::Tree => {
        let tree = folk.department_tree(actor).await?;
        let rows: Vec<_> = walk_with_level(tree.into_records())
          .map(|(d, level)| json!({ "id": d.id, "name": d.name, "level": level }))
          .collect();
        print(&rows)
      }
      Self::Subtree { id } => print(&folk.subtree(actor, id).await?),
      Self::Parents { id } => print(&folk.allowed_parents(actor, id).await?),
      Self::Add { name, parent } => print(&folk.add_department(actor, &name, parent).await?),
      Self::Mv { id, parent } => print(&folk.move_department(actor, id, parent).await?),
      Self::Rename { id, name } => print(&folk.rename_department(actor, id, &name).await?),
      Self::Rm { id } => print(&folk.delete_department(actor, id).await?),
      Self::Members { id, subtree } => {
        print(&folk.people_in_department(actor, id, subtree).await?)
      }
      Self::Assign { id, person } => {
        print(&folk.add_person_to_department(actor, id, person).await?)
      }
      Self::Unassign { id, person } => {
        print(&folk.remove_person_from_department(actor, id, person).await?)
      }
    }
  }
}

impl AclCommand {
  async fn run(self, folk: &Folk, actor: Option<&Person>) -> anyhow::Result<()> {
    match self {
      Self::Grant { principal, permissions } => {
        print(&folk.grant(actor, principal, permissions).await?)
      }
      Self::Revoke { entry } => {
        folk.revoke(actor, entry).await?;
        print(&json!({ "revoked": entry }))
      }
      Self::List => print(&folk.all_grants(actor).await?),
      Self::Show { principal } => print(&folk.permissions_for(actor, principal).await?),
      Self::Permissions => print(&Permission::all().collect::<Vec<_>>()),
    }
  }
}

impl GroupCommand {
  async fn run(self, folk: &Folk, actor: Option<&Person>) -> anyhow::Result<()> {
    match self {
      Self::Add { name } => print(&folk.add_group(actor, &name).await?),
      Self::List => print(&folk.list_groups(actor).await?),
      Self::Join { group, user } => {
        folk.add_group_member(actor, group, user).await?;
        print(&json!({ "group": group, "joined": user }))
      }
      Self::Leave { group, user } => {
        folk.remove_group_member(actor, group, user).await?;
        print(&json!({ "group": group, "left": user }))
      }
    }
  }
}

impl PeopleCommand {
  async fn run(self, folk: &Folk, actor: Option<&Person>) -> anyhow::Result<()> {
    match self {
      Self::Add(args) => print(&folk.create_person(actor, args.into_new_person()).await?),
      Self::BootstrapAdmin(args) => {
        let store = folk.store();
        let people = store.list_people().await?;
        if people.iter().any(|p| p.admin) {
          bail!("an administrator already exists");
        }
        let input = NewPerson { admin: true, ..args.into_new_person() };
        let admin = store.add_person(input).await?;
        info!(id = admin.id, login = %admin.login, "administrator created");
        print(&admin)
      }
      Self::Show { id } => print(&folk.show_person(actor, id).await?),
      Self::Update { id, json } => {
        let update: PersonUpdate = parse_json(&json, "person update")?;
        let (person, outcome) = folk.update_person(actor, id, update).await?;
        print(&json!({ "person": person, "outcome": outcome }))
      }
      Self::Rm { id } => {
        folk.delete_person(actor, id).await?;
        print(&json!({ "deleted": id }))
      }
      Self::Query { spec, saved, search, limit, offset } => {
        let mut spec: QuerySpec = match spec {
          Some(raw) => parse_json(&raw, "query spec")?,
          None => QuerySpec::default(),
        };
        spec.saved_query_id = saved.or(spec.saved_query_id);
        if search.is_some() {
          spec.search = search;
        }
        print(&folk.query_people(actor, spec, limit, offset).await?)
      }
      Self::Birthdays { days, at: Some(today) } => {
        print(&folk.next_birthdays_at(actor, days, today).await?)
      }
      Self::Birthdays { days, at: None } => print(&folk.next_birthdays(actor, days).await?),
      Self::Newcomers { limit } => print(&folk.newcomers(actor, limit).await?),
    }
  }
}

impl QueryCommand {
  async fn run(self, folk: &Folk, actor: Option<&Person>) -> anyhow::Result<()> {
    match self {
      Self::Save { json } => {
        print(&folk.save_query(actor, parse_json(&json, "query spec")?).await?)
      }
      Self::Update { id, json } => {
        print(&folk.update_query(actor, id, parse_json(&json, "query spec")?).await?)
      }
      Self::List => print(&folk.visible_queries(actor).await?),
      Self::Rm { id } => {
        folk.delete_query(actor, id).await?;
        print(&json!({ "deleted": id }))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  #[derive(Parser)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(std::iter::once("folk").chain(args.iter().copied()))
      .unwrap()
      .command
  }

  #[test]
  fn department_move_without_parent_targets_the_root() {
    match parse(&["departments", "mv", "4"]) {
      Command::Departments(DepartmentCommand::Mv { id, parent }) => {
        assert_eq!(id, 4);
        assert_eq!(parent, None);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn grant_needs_at_least_one_permission() {
    assert!(Cli::try_parse_from(["folk", "acl", "grant", "3"]).is_err());
    match parse(&["acl", "grant", "3", "view_people", "edit_people"]) {
      Command::Acl(AclCommand::Grant { principal, permissions }) => {
        assert_eq!(principal, 3);
        assert_eq!(permissions, vec!["view_people", "edit_people"]);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn new_person_args_parse_tags() {
    match parse(&["people", "add", "rhill", "Robert", "Hill", "--tags", "b, a,,a"]) {
      Command::People(PeopleCommand::Add(args)) => {
        let input = args.into_new_person();
        assert_eq!(input.login, "rhill");
        assert_eq!(input.tags, vec!["a", "b"]);
        assert!(!input.admin);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn department_lookups_take_an_id() {
    assert!(matches!(
      parse(&["departments", "subtree", "2"]),
      Command::Departments(DepartmentCommand::Subtree { id: 2 })
    ));
    assert!(matches!(
      parse(&["departments", "parents", "5"]),
      Command::Departments(DepartmentCommand::Parents { id: 5 })
    ));
    assert!(Cli::try_parse_from(["folk", "departments", "parents"]).is_err());
  }

  #[test]
  fn acl_show_takes_a_principal() {
    assert!(matches!(
      parse(&["acl", "show", "7"]),
      Command::Acl(AclCommand::Show { principal: 7 })
    ));
  }

  #[test]
  fn birthdays_accept_a_start_date() {
    match parse(&["people", "birthdays", "--days", "10", "--at", "2026-02-28"]) {
      Command::People(PeopleCommand::Birthdays { days, at }) => {
        assert_eq!(days, 10);
        assert_eq!(at, NaiveDate::from_ymd_opt(2026, 2, 28));
      }
      other => panic!("unexpected {other:?}"),
    }
    match parse(&["people", "birthdays"]) {
      Command::People(PeopleCommand::Birthdays { days, at }) => {
        assert_eq!(days, 30);
        assert_eq!(at, None);
      }
      other => panic!("unexpected {other:?}"),
    }
    assert!(Cli::try_parse_from(["folk", "people", "birthdays", "--at", "28/02/2026"]).is_err());
  }

  #[test]
  fn query_saved_conflicts_with_spec() {
    assert!(
      Cli::try_parse_from(["folk", "people", "query", "--spec", "{}", "--saved", "1"]).is_err()
    );
  }
}

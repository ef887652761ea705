//! Core types and trait definitions for the Folk people directory.
//!
//! This crate has no HTTP or database dependencies. It holds
//! the department tree, the access-control and visibility rules, and the
//! query compiler; storage backends implement [`store::DirectoryStore`].

// Trait methods declare `Send` futures explicitly; implementations use
// `async fn`.
#![allow(async_fn_in_trait)]

pub mod acl;
pub mod department;
pub mod directory;
pub mod engine;
pub mod error;
pub mod filter;
pub mod membership;
pub mod person;
pub mod principal;
pub mod query;
pub mod store;
pub mod visibility;

pub use error::{Error, Result};

//! # Tarkin Testkit
//!
//! Testing utilities for Tarkin.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a [`Keeper`](tarkin::Keeper) over a fresh store with
//!   helpers to register users quickly
//! - **Generators**: Proptest strategies for passwords, names, emails,
//!   directory names and search patterns
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use tarkin_testkit::fixtures::TestFixture;
//!
//! async fn scenario() {
//!     let fixture = TestFixture::new();
//!     let alice = fixture.register("Alice").await;
//!     let group = fixture.keeper.create_group(&alice, "ops").await.unwrap();
//!     assert!(fixture.keeper.is_member(alice.id(), group.id).await.unwrap());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tarkin_testkit::generators::{credential, user_password};
//!
//! proptest! {
//!     #[test]
//!     fn user_passwords_validate(password in user_password()) {
//!         prop_assert!(credential(&password).validate_for_user().is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{impostor, multi_user_fixture, TestFixture};

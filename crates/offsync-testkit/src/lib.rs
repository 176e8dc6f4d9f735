//! # offsync testkit
//!
//! Testing utilities for offsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: A memory cache, a memory remote and a shared gate wired
//!   into sync managers and clients
//! - **Builders**: Short constructors for server-side and locally edited objects
//! - **Generators**: Proptest strategies for documents, objects and conditions
//!
//! ## Test Fixtures
//!
//! ```rust
//! use offsync_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let client = fixture.client(Default::default());
//! assert!(client.actor().is_none());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use offsync_testkit::generators::{cached_object, condition};
//!
//! proptest! {
//!     #[test]
//!     fn stable_form_round_trips(c in condition()) {
//!         let parsed = offsync_core::Condition::from_stable_string(&c.to_stable_string()).unwrap();
//!         prop_assert_eq!(parsed, c);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{doc, init_tracing, local_object, server_object, TestFixture};
pub use generators::{cached_object, condition, document, timestamp};

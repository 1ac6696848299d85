// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory host adapter and manual scheduler for the trellis reconciler.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`host`] - [`NoopHost`], a host tree kept in maps with an operation log
//! - [`scheduler`] - [`ManualScheduler`], tasks run only when the test asks

pub mod host;
pub mod scheduler;

pub use host::{HostOp, NoopHost};
pub use scheduler::ManualScheduler;

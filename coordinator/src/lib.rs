// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model migration coordinator
//!
//! Moves a model from this controller to another one.  A migration walks
//! through the phases in [`phase::MigrationPhase`], driven by a single
//! controller-side worker, while every agent running for the model follows
//! along and acknowledges each phase with a minion report.
//!
//! All state lives in a [`db::DataStore`] that only offers conditional
//! writes.  At most one migration of a model is active at a time, and phase
//! changes are rejected if the writer's view of the migration is stale.
//! Observers learn about changes through [`watcher::NotifyWatcher`]s rather
//! than by polling.

pub mod config;
mod coordinator;
pub mod db;
mod migration;
pub mod names;
pub mod phase;
pub mod spec;
pub mod topology;
pub mod watcher;

pub use coordinator::Coordinator;
pub use migration::Migration;
pub use migration::MigrationStatus;
pub use migration::MinionReports;

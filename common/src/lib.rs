// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common facilities shared by the model migration coordinator and the
//! components that consume it.
//!
//! The coordinator itself lives in the `model-migration` crate.  This crate
//! holds the error type surfaced by every coordinator operation, along with a
//! handful of small value types (revision numbers, resource names) that the
//! facade layer needs without pulling in the coordinator.

pub mod api;
pub mod typed_uuid;

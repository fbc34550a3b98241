// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for working with the migration document store

mod datastore;
pub mod model;
mod transaction_retry;
pub mod txn;

pub use datastore::DataStore;
pub use datastore::DocChange;
pub use datastore::ModelCreate;

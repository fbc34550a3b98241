// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-document conditional transactions
//!
//! A transaction is a list of [`TxnOp`]s.  Each op names one document, the
//! conditions that must hold for that document, and the change to make to
//! it.  The store checks every condition before writing anything; if any
//! fails, nothing is written.

use super::model::Collection;
use migration_common::api::external::Error;
use serde_json::Value;

/// A condition on the state of a document at commit time
#[derive(Clone, Debug, PartialEq)]
pub enum Assert {
    DocExists,
    DocMissing,
    /// The document exists and the named field has this value
    FieldEq(&'static str, Value),
    /// The document exists and the named field is absent or null
    FieldUnset(&'static str),
}

/// A change to one document
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    /// Create the document.  Implies [`Assert::DocMissing`].
    Insert(Value),
    /// Overwrite top-level fields of an existing document
    Set(Vec<(&'static str, Value)>),
    /// Remove top-level fields of an existing document
    Unset(Vec<&'static str>),
    Remove,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxnOp {
    pub collection: Collection,
    pub id: String,
    pub asserts: Vec<Assert>,
    pub update: Option<Update>,
}

impl TxnOp {
    pub fn new(collection: Collection, id: impl Into<String>) -> TxnOp {
        TxnOp { collection, id: id.into(), asserts: Vec::new(), update: None }
    }

    pub fn assert(mut self, assert: Assert) -> TxnOp {
        self.asserts.push(assert);
        self
    }

    pub fn insert(mut self, doc: Value) -> TxnOp {
        self.update = Some(Update::Insert(doc));
        self
    }

    /// Sets `field` to `value`, merging with any fields already being set by
    /// this op
    pub fn set(mut self, field: &'static str, value: Value) -> TxnOp {
        match &mut self.update {
            Some(Update::Set(fields)) => fields.push((field, value)),
            _ => self.update = Some(Update::Set(vec![(field, value)])),
        }
        self
    }

    pub fn unset(mut self, fields: Vec<&'static str>) -> TxnOp {
        self.update = Some(Update::Unset(fields));
        self
    }

    pub fn remove(mut self) -> TxnOp {
        self.update = Some(Update::Remove);
        self
    }
}

/// Builds the JSON value for a document or field
pub fn to_doc<T: serde::Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|e| {
        Error::internal_error(&format!("failed to serialize document: {}", e))
    })
}

/// Checks `assert` against the current contents of a document
pub(crate) fn check_assert(doc: Option<&Value>, assert: &Assert) -> bool {
    match (assert, doc) {
        (Assert::DocExists, doc) => doc.is_some(),
        (Assert::DocMissing, doc) => doc.is_none(),
        (Assert::FieldEq(field, expected), Some(doc)) => {
            doc.get(field) == Some(expected)
        }
        (Assert::FieldUnset(field), Some(doc)) => {
            doc.get(field).map_or(true, Value::is_null)
        }
        (Assert::FieldEq(..) | Assert::FieldUnset(_), None) => false,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    /// A precondition did not hold.  Nothing was written.
    #[error("transaction aborted: {collection}/{id}: {reason}")]
    Aborted { collection: Collection, id: String, reason: String },
    /// The transaction could not be applied for reasons unrelated to its
    /// preconditions
    #[error(transparent)]
    Internal(#[from] Error),
}

impl From<TxnError> for Error {
    fn from(error: TxnError) -> Self {
        match error {
            TxnError::Aborted { .. } => Error::unavail(&error.to_string()),
            TxnError::Internal(e) => e,
        }
    }
}

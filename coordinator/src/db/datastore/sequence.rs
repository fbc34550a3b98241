// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on per-model migration attempt counters

use super::DataStore;
use crate::db::model::Collection;
use crate::db::model::SequenceRecord;
use crate::db::txn::{Assert, TxnOp};
use migration_common::api::external::Error;
use migration_common::typed_uuid::ModelUuid;
use serde_json::json;

impl DataStore {
    /// Builds the op that claims the next attempt number for `model_id`
    ///
    /// Returns the claimed value.  Nothing is consumed unless the op is
    /// committed, and the op aborts if another writer claims the same value
    /// first.
    pub(crate) fn sequence_next_op(
        &self,
        model_id: ModelUuid,
    ) -> Result<(u32, TxnOp), Error> {
        let doc_id = SequenceRecord::doc_id(model_id);
        let current =
            self.doc::<SequenceRecord>(Collection::Sequence, &doc_id)?;
        let op = TxnOp::new(Collection::Sequence, doc_id);
        match current {
            None => {
                let record = SequenceRecord { counter: 1 };
                Ok((
                    0,
                    op.assert(Assert::DocMissing)
                        .insert(crate::db::txn::to_doc(&record)?),
                ))
            }
            Some(SequenceRecord { counter }) => {
                let next = counter.checked_add(1).ok_or_else(|| {
                    Error::internal_error(&format!(
                        "migration sequence for model {} exhausted",
                        model_id
                    ))
                })?;
                Ok((
                    counter,
                    op.assert(Assert::FieldEq(
                        SequenceRecord::FIELD_COUNTER,
                        json!(counter),
                    ))
                    .set(SequenceRecord::FIELD_COUNTER, json!(next)),
                ))
            }
        }
    }

    /// Claims and returns the next attempt number for `model_id`
    pub async fn sequence_next(&self, model_id: ModelUuid) -> Result<u32, Error> {
        self.transaction_with_retry("sequence_next", |_| {
            let (value, op) = self.sequence_next_op(model_id)?;
            Ok((vec![op], value))
        })
        .await
    }

    /// Returns the value the next call to [`DataStore::sequence_next`] would
    /// claim, without claiming it
    pub async fn sequence_peek(&self, model_id: ModelUuid) -> Result<u32, Error> {
        let record = self.doc::<SequenceRecord>(
            Collection::Sequence,
            &SequenceRecord::doc_id(model_id),
        )?;
        Ok(record.map_or(0, |r| r.counter))
    }
}

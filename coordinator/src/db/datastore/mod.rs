// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primary control plane interface for migration state
//!
//! The [`DataStore`] holds every document the coordinator reads or writes.
//! Writes happen only through [`DataStore::run_transaction`], which applies a
//! list of conditional operations atomically and publishes a [`DocChange`]
//! for every document it touched.  There are no locks held across calls:
//! callers that need consistency assert on the values they read.
//!
//! Operations are grouped into submodules by the kind of document they are
//! concerned with.

use super::model::Collection;
use super::transaction_retry::RetryHelper;
use super::txn::{check_assert, Assert, TxnError, TxnOp, Update};
use crate::config::MigrationPolicy;
use migration_common::api::external::Error;
use migration_common::api::external::Generation;
use serde::de::DeserializeOwned;
use serde_json::Value;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

mod migration;
mod minion_report;
mod model;
mod sequence;
mod watchers;

pub use model::ModelCreate;

/// How many changes a slow subscriber may fall behind before it is told it
/// lagged
const CHANGE_FEED_CAPACITY: usize = 1024;

/// A write to one document, as published on the change feed
#[derive(Clone, Debug, PartialEq)]
pub struct DocChange {
    pub collection: Collection,
    pub id: String,
    pub revno: Generation,
    /// Contents after the write, or `None` if the document was removed
    pub doc: Option<Value>,
}

#[derive(Clone, Debug)]
struct StoredDoc {
    revno: Generation,
    value: Value,
}

type DocKey = (Collection, String);

#[cfg(any(test, feature = "testing"))]
type BeforeHook =
    Box<dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send>;

/// In-process stand-in for the document database
///
/// Consistency comes from the assertions on each transaction, not from
/// locking: transactions on different models never assert on each other's
/// documents and so never abort each other.  `docs` is locked only for the
/// check and commit of a single transaction and never across an await, as a
/// database would serialize its own commits.  Likewise every watcher reads
/// the one change feed and keeps the changes its filter selects.
pub struct DataStore {
    log: Logger,
    policy: MigrationPolicy,
    docs: Mutex<BTreeMap<DocKey, StoredDoc>>,
    changes: broadcast::Sender<DocChange>,
    #[cfg(any(test, feature = "testing"))]
    before_hooks: Mutex<std::collections::VecDeque<BeforeHook>>,
}

impl DataStore {
    pub fn new(log: &Logger, policy: MigrationPolicy) -> DataStore {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        DataStore {
            log: log.new(slog::o!("component" => "datastore")),
            policy,
            docs: Mutex::new(BTreeMap::new()),
            changes,
            #[cfg(any(test, feature = "testing"))]
            before_hooks: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    /// Returns a receiver for every change committed from now on
    pub fn subscribe_changes(&self) -> broadcast::Receiver<DocChange> {
        self.changes.subscribe()
    }

    /// Fetches the raw contents and revision of a document
    pub fn doc_raw(
        &self,
        collection: Collection,
        id: &str,
    ) -> Option<(Generation, Value)> {
        let docs = self.docs.lock().unwrap();
        docs.get(&(collection, id.to_string()))
            .map(|stored| (stored.revno, stored.value.clone()))
    }

    /// Fetches and deserializes a document
    pub(crate) fn doc<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<T>, Error> {
        self.doc_raw(collection, id)
            .map(|(_, value)| decode(collection, id, value))
            .transpose()
    }

    /// Fetches and deserializes every document in `collection` that `filter`
    /// accepts, in id order
    pub(crate) fn scan<T, F>(
        &self,
        collection: Collection,
        filter: F,
    ) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
        F: Fn(&Value) -> bool,
    {
        let matching: Vec<(String, Value)> = {
            let docs = self.docs.lock().unwrap();
            docs.range((collection, String::new())..)
                .take_while(|((c, _), _)| *c == collection)
                .filter(|(_, stored)| filter(&stored.value))
                .map(|((_, id), stored)| (id.clone(), stored.value.clone()))
                .collect()
        };
        matching
            .into_iter()
            .map(|(id, value)| decode(collection, &id, value))
            .collect()
    }

    /// Applies `ops` atomically
    ///
    /// Every assertion is checked against the state of the store before any
    /// op is applied.  If one fails, the transaction is aborted and nothing is
    /// written.  Otherwise every update is applied, the revision of every
    /// updated document is advanced, and the changes are published in the
    /// order of `ops`.
    pub async fn run_transaction(&self, ops: Vec<TxnOp>) -> Result<(), TxnError> {
        #[cfg(any(test, feature = "testing"))]
        self.run_before_hook().await;

        let mut docs = self.docs.lock().unwrap();

        for op in &ops {
            let key = (op.collection, op.id.clone());
            let current = docs.get(&key).map(|stored| &stored.value);
            let implied = match op.update {
                Some(Update::Insert(_)) => Some(Assert::DocMissing),
                Some(Update::Set(_) | Update::Unset(_) | Update::Remove) => {
                    Some(Assert::DocExists)
                }
                None => None,
            };
            for assert in op.asserts.iter().chain(implied.iter()) {
                if !check_assert(current, assert) {
                    return Err(TxnError::Aborted {
                        collection: op.collection,
                        id: op.id.clone(),
                        reason: format!("{:?} does not hold", assert),
                    });
                }
            }
        }

        // Stage every write before committing any of them so that a failure
        // part way through leaves the store untouched.
        let mut staged: Vec<(DocKey, Option<StoredDoc>)> = Vec::new();
        for op in ops {
            let Some(update) = op.update else {
                continue;
            };
            let key = (op.collection, op.id);
            let previous = staged
                .iter()
                .rev()
                .find(|(k, _)| *k == key)
                .map(|(_, doc)| doc.clone())
                .unwrap_or_else(|| docs.get(&key).cloned());
            let next = apply_update(&key, previous, update)?;
            staged.push((key, next));
        }

        for (key, next) in staged {
            let change = match next {
                Some(stored) => {
                    let change = DocChange {
                        collection: key.0,
                        id: key.1.clone(),
                        revno: stored.revno,
                        doc: Some(stored.value.clone()),
                    };
                    docs.insert(key, stored);
                    change
                }
                None => {
                    let revno = docs
                        .remove(&key)
                        .map(|stored| stored.revno.next())
                        .unwrap_or_default();
                    DocChange {
                        collection: key.0,
                        id: key.1,
                        revno,
                        doc: None,
                    }
                }
            };
            // Publishing while the lock is held keeps the feed in commit
            // order.  Having no subscribers is not an error.
            let _ = self.changes.send(change);
        }

        Ok(())
    }

    /// Builds and runs a transaction, rebuilding it if it aborts
    ///
    /// `build` is called with the attempt number (starting at 1) and reads
    /// whatever state it needs to produce the ops along with a value to return
    /// on success.  If it finds a condition that makes the operation
    /// impossible it returns that error, which is passed through as-is.  If
    /// the transaction aborts, `build` is called again after a short random
    /// delay, up to the configured number of attempts.
    pub(crate) async fn transaction_with_retry<T, F>(
        &self,
        name: &'static str,
        mut build: F,
    ) -> Result<T, Error>
    where
        F: FnMut(u32) -> Result<(Vec<TxnOp>, T), Error>,
    {
        let retry_helper = RetryHelper::new(
            &self.log,
            name,
            self.policy.txn_max_attempts,
            self.policy.max_retry_backoff(),
        );
        loop {
            let (ops, value) = build(retry_helper.attempt())?;
            if ops.is_empty() {
                return Ok(value);
            }
            match self.run_transaction(ops).await {
                Ok(()) => return Ok(value),
                Err(TxnError::Internal(e)) => return Err(e),
                Err(e @ TxnError::Aborted { .. }) => {
                    slog::debug!(
                        self.log,
                        "transaction aborted";
                        "transaction" => retry_helper.name(),
                        "reason" => %e,
                    );
                    if !retry_helper.retry_callback().await {
                        return Err(Error::unavail(&format!(
                            "{}: too many transaction attempts",
                            name
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl DataStore {
    /// Queues `hook` to run immediately before the next transaction is
    /// checked and committed
    ///
    /// Hooks run one per transaction, in the order they were queued.  A
    /// transaction run by a hook consumes the next queued hook, if any.
    pub fn set_before_hook<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let hook: BeforeHook = Box::new(move || Box::pin(hook()));
        self.before_hooks.lock().unwrap().push_back(hook);
    }

    /// Returns true if every queued hook has run
    pub fn before_hooks_done(&self) -> bool {
        self.before_hooks.lock().unwrap().is_empty()
    }

    async fn run_before_hook(&self) {
        let hook = self.before_hooks.lock().unwrap().pop_front();
        if let Some(hook) = hook {
            hook().await;
        }
    }
}

fn decode<T: DeserializeOwned>(
    collection: Collection,
    id: &str,
    value: Value,
) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| {
        Error::internal_error(&format!(
            "failed to decode {}/{}: {}",
            collection, id, e
        ))
    })
}

fn apply_update(
    key: &DocKey,
    previous: Option<StoredDoc>,
    update: Update,
) -> Result<Option<StoredDoc>, TxnError> {
    let missing = || TxnError::Aborted {
        collection: key.0,
        id: key.1.clone(),
        reason: String::from("document is missing"),
    };
    match update {
        Update::Insert(value) => {
            if previous.is_some() {
                return Err(TxnError::Aborted {
                    collection: key.0,
                    id: key.1.clone(),
                    reason: String::from("document already exists"),
                });
            }
            Ok(Some(StoredDoc { revno: Generation::new(), value }))
        }
        Update::Set(fields) => {
            let mut stored = previous.ok_or_else(missing)?;
            let object = as_object(key, &mut stored.value)?;
            for (field, value) in fields {
                object.insert(field.to_string(), value);
            }
            stored.revno = stored.revno.next();
            Ok(Some(stored))
        }
        Update::Unset(fields) => {
            let mut stored = previous.ok_or_else(missing)?;
            let object = as_object(key, &mut stored.value)?;
            for field in fields {
                object.remove(field);
            }
            stored.revno = stored.revno.next();
            Ok(Some(stored))
        }
        Update::Remove => {
            previous.ok_or_else(missing)?;
            Ok(None)
        }
    }
}

fn as_object<'a>(
    key: &DocKey,
    value: &'a mut Value,
) -> Result<&'a mut serde_json::Map<String, Value>, TxnError> {
    value.as_object_mut().ok_or_else(|| {
        TxnError::Internal(Error::internal_error(&format!(
            "document {}/{} is not an object",
            key.0, key.1
        )))
    })
}

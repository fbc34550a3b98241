// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Coalescing change notifications
//!
//! A [`NotifyWatcher`] follows the store's change feed in a background task
//! and signals its owner whenever a change passes the watcher's filter.
//! Signals are coalesced: any number of matching changes between two calls
//! to [`NotifyWatcher::changed`] produce a single notification.  Every
//! watcher delivers one notification as soon as it is created so that its
//! owner reads the initial state.

use crate::db::DocChange;
use slog::{debug, Logger};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum WatcherError {
    #[error("watcher was stopped")]
    Stopped,
    #[error("change feed closed")]
    Closed,
}

#[derive(Debug)]
pub struct NotifyWatcher {
    rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
    stopped: bool,
}

impl NotifyWatcher {
    /// Starts a watcher over `changes`
    ///
    /// `changes` should be subscribed before the caller reads whatever
    /// initial state `filter` depends on, so that no change between the read
    /// and the subscription is missed.
    pub(crate) fn spawn<F>(
        log: Logger,
        mut changes: broadcast::Receiver<DocChange>,
        mut filter: F,
    ) -> NotifyWatcher
    where
        F: FnMut(&DocChange) -> bool + Send + 'static,
    {
        let (tx, rx) = watch::channel(0u64);
        tx.send_modify(|n| *n += 1);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    change = changes.recv() => match change {
                        Ok(change) => {
                            if filter(&change) {
                                tx.send_modify(|n| *n += 1);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // We can't tell what we missed, so assume it
                            // mattered.
                            debug!(log, "watcher lagged"; "skipped" => skipped);
                            tx.send_modify(|n| *n += 1);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        NotifyWatcher { rx, task, stopped: false }
    }

    /// Waits for the next notification
    ///
    /// Returns [`WatcherError::Stopped`] once the watcher has been stopped,
    /// even if changes were pending.
    pub async fn changed(&mut self) -> Result<(), WatcherError> {
        if self.stopped {
            return Err(WatcherError::Stopped);
        }
        self.rx.changed().await.map_err(|_| WatcherError::Closed)?;
        self.rx.borrow_and_update();
        Ok(())
    }

    /// Returns true if a notification is ready
    pub fn has_changed(&self) -> bool {
        !self.stopped && self.rx.has_changed().unwrap_or(false)
    }

    /// Stops the watcher and releases its subscription to the change feed
    pub fn stop(&mut self) {
        self.stopped = true;
        self.task.abort();
        self.rx.borrow_and_update();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for NotifyWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

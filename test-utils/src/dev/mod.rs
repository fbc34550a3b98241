// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for development tools and the test suite.  These should
//! not be used in production code.

pub use dropshot::test_util::LogContext;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingIfExists;
use dropshot::ConfigLoggingLevel;
use slog::Logger;
use std::time::Duration;

/// How long a test waits for a watcher notification that it expects.
pub const LONG_WAIT: Duration = Duration::from_secs(10);

/// How long a test waits to convince itself that no notification is coming.
pub const SHORT_WAIT: Duration = Duration::from_millis(50);

/// Set up a [`dropshot::test_util::LogContext`] appropriate for a test named
/// `test_name`
///
/// This function is currently only used by unit tests.  (We want the dead code
/// warning if it's removed from unit tests, but not during a normal build.)
pub fn test_setup_log(test_name: &str) -> LogContext {
    let log_config = ConfigLogging::File {
        level: ConfigLoggingLevel::Trace,
        path: String::from("UNUSED").into(),
        if_exists: ConfigLoggingIfExists::Fail,
    };

    LogContext::new(test_name, &log_config)
}

/// Returns a child of `logctx`'s logger tagged with `component`
pub fn component_log(logctx: &LogContext, component: &'static str) -> Logger {
    logctx.log.new(slog::o!("component" => component))
}

//! Migration coordinator integration tests
//!
//! See the driver in the parent directory for how and why this is structured
//! the way it is.

mod lifecycle;

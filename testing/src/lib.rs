//! Shared test fixtures for the client workspace.
//!
//! Provides a scripted transport double with exact invocation counting, so
//! behavioural tests can assert how many times the wire was touched without
//! standing up a server.

mod mock_transport;

pub use mock_transport::*;

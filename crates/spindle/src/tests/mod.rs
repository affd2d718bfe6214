//! Behavioural test suites for the server core.

mod server_behaviour;
mod support;

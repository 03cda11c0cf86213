//! Integration tests for Kitsunari
//!
//! Tests are organized by component:
//! - allanime_test: AllAnime GraphQL client against a mock server
//! - session_test: Player session and progress tracker against a fake mpv
//! - coordinator_test: Play/resume/stop flows with an in-memory provider
//! - cli_test: Argument parsing, command handlers, JSON output

// Note: Each test file is a separate integration test crate
// Tests are run individually by cargo, not via mod.rs

//! Mock implementations and fixtures for testing

pub mod recording_sink;
pub mod table;

pub use recording_sink::{RecordingSink, SinkLog};
pub use table::{card, catch_up, naive_action, session_manager, test_config, MatchFixture};

//! Property-based tests for the rule engine

pub mod game_properties;

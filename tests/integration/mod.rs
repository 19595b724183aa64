//! Integration tests for complete matches between two controllers

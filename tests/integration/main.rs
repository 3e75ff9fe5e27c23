//! Integration tests for the harvest pipeline
//!
//! These tests use wiremock to stand in for the sites being collected and
//! run the full fetch-and-persist cycle end-to-end against a SQLite store.

mod common;
mod feed_tests;
mod pipeline_tests;
mod storage_tests;

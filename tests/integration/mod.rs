//! Integration tests for the query router

mod config_integration;
mod context_tree;
mod lifecycle;
mod test_utils;

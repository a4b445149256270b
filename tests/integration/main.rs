//! Integration tests for board-harvest

mod crawl_tests;
mod dedup_tests;
mod ledger_tests;
mod scheduler_tests;

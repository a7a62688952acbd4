//! Integration tests for flare_core
//!
//! Drive the full reporting pipeline through a recording transport and,
//! for the HTTP path, through a wiremock collector.

mod common;

mod test_admission;
mod test_delivery;
mod test_http;
mod test_offline;

//! Support code for test binaries that use this crate.

pub mod log;

pub use log::init_test_logging;

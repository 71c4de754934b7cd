mod common;
mod options_tests;
mod run_tests;
mod store_tests;

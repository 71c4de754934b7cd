mod options_tests;
mod process_tests;
mod scheduling_tests;
mod store_tests;

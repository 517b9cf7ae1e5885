
mod merge_tests;

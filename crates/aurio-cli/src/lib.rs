//! Shared helpers of the aurio command line tools

pub mod output;

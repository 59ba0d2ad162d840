#![doc = include_str!("../../README.md")]

pub mod error;
pub mod logging;
pub mod opts;
pub mod runner;
pub mod sink;
pub mod source;

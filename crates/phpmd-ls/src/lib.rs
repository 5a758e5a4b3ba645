// lib.rs - Library crate behind the phpmd-ls binary.
//
// Integration tests under tests/ drive the controller through these modules
// with fake runners and sinks.

pub mod backend;
pub mod config;
pub mod controller;
pub mod executable;
pub mod publisher;
pub mod report;
pub mod runner;
pub mod schedule;
pub mod sink;

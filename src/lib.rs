// src/lib.rs - Library root for Tollgate

pub mod cli;
pub mod contract;
pub mod core;
pub mod handler;
pub mod infra;
pub mod library;
pub mod store;

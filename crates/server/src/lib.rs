// huddle-server library entry point (router reused by integration tests).

pub mod config;
pub mod error;
pub mod registry;
pub mod ws;

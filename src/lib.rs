//! Library crate for ssbd, exposing modules for the daemon binary and integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;

#![cfg_attr(not(test), forbid(unsafe_code))]

//! Models and configuration shared by the chatlog ingester and read API.

pub mod config;
pub mod models;

//! Library exports for the short link service
//!
//! This module exposes internal components for testing and potential library usage.

pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod handler;
pub mod meta;
pub mod middleware;
pub mod model;
pub mod page;
pub mod password;
pub mod route;
pub mod short_link;
pub mod slug;
pub mod state;
pub mod token;

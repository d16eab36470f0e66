// Library exports for Coffee
// Integration tests build the router through these modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod moderation;
pub mod retry;
pub mod routes;
pub mod social;
pub mod state;
pub mod storage;

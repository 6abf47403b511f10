//! Multipart media upload coordinator.
//!
//! Clients upload large recordings straight to object storage through
//! presigned URLs; this crate plans the part layout, drives the multipart
//! lifecycle, and keeps a durable record of every upload in SQLite.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

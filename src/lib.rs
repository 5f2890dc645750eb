//! Document processing job API.
//!
//! Accepts OCR and transcription uploads, tracks each job through its
//! lifecycle in a shared state store, and hands work to background workers
//! over named queues.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

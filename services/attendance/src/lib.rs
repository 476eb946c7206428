//! Classroom attendance service
//!
//! Teachers open time-boxed sessions that mint sealed QR tokens, students
//! scan them to be marked present once, and finished sessions are backfilled
//! with absences. The binary in `main.rs` wires these modules together.

pub mod admin;
pub mod attendance;
pub mod clock;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod qr;
pub mod reporting;
pub mod repositories;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod sweeper;
#[cfg(test)]
mod testing;
pub mod ws;

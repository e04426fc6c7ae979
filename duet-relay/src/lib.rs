//! # duet-relay
//!
//! Blind relay server for the duet two-party E2EE messaging app.
//!
//! This crate implements a relay server that:
//! - Pairs exactly two users via a single-use relay token
//! - Stores and forwards signed, opaque ciphertext entries
//! - Deletes entries on delivery acknowledgement
//! - Relays a one-shot history bundle during re-pairing
//! - Never sees plaintext (relay is a "dumb pipe")
//!
//! ## Architecture
//!
//! ```text
//! User A ──┐                      ┌── User B
//!          │   HTTP + WebSocket   │
//!          ├─────────────────────►│
//!          │                      │
//!      ┌───┴──────────────────────┴───┐
//!      │         duet-relay           │
//!      │  ┌───────────────────────┐   │
//!      │  │  SQLite (pairs,       │   │
//!      │  │  users, tokens,       │   │
//!      │  │  entries)             │   │
//!      │  └───────────────────────┘   │
//!      └──────────────────────────────┘
//! ```
//!
//! ## Request flow
//!
//! front door (router, throttle) → signature verifier → service
//! (pairing / entries / handoff) → store. Push notifications fan out
//! asynchronously after upload and never block the response.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod entries;
pub mod error;
pub mod handoff;
pub mod http;
pub mod pairing;
pub mod push;
pub mod state;
pub mod storage;
pub mod throttle;

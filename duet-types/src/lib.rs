//! # duet-types
//!
//! Shared types for the duet blind relay.
//!
//! This crate provides the vocabulary used across the relay:
//! - [`PublicKey`], [`PairId`], [`EntryId`], [`RelayToken`] - Identity types
//! - [`DayId`] - Calendar-date addressing for entries
//! - [`ChannelFrame`] - Handoff channel frames
//! - [`TypeError`] - Parse failures

#![warn(missing_docs)]
#![warn(clippy::all)]

mod day;
mod error;
mod ids;
mod messages;

pub use day::DayId;
pub use error::TypeError;
pub use ids::{EntryId, PairId, PublicKey, RelayToken, PUBLIC_KEY_LEN, RELAY_TOKEN_LEN};
pub use messages::ChannelFrame;

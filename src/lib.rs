//! Client core for multi-turn LLM conversations: request assembly with
//! mention and attachment resolution, the streaming frame decoder, an
//! optional web-search pre-step, conversation mutation (edit, retry,
//! split) and per-conversation cancellation.
//!
//! The crate is headless. Hosts inject the transport, the search backend,
//! the attachment store, the persistence layer and the overlay/display
//! collaborators into [`services::TurnController`] and drive it with
//! send/edit/retry/split calls.

pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;

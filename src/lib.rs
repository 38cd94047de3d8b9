//! MathLogos is a tutoring chat client for Korean university math essay
//! exam preparation, backed by the Gemini API.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the Gemini `generateContent` wire payloads.
//! - [`core`] owns the provider session ([`core::session`]), the conversation
//!   state and turn controller ([`core::controller`]), student profiles,
//!   configuration, and streaming transport.
//! - [`cli`] parses arguments and runs the line-oriented chat REPL and the
//!   one-shot `ask` command.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;

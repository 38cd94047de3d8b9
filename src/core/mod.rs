pub mod attachment;
pub mod backend;
pub mod chat_stream;
pub mod config;
pub mod constants;
pub mod controller;
pub mod conversation;
pub mod message;
pub mod profile;
pub mod providers;
pub mod session;

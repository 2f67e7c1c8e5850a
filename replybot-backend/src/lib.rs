//! Mention reply bot: polls an account's mentions, drafts an answer for each
//! conversation with a chat model, and posts the reply.

pub mod ai;
pub mod config;
pub mod error;
pub mod generator;
pub mod http;
pub mod models;
pub mod pipeline;
pub mod publisher;
pub mod render;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod text;
pub mod twitter;

pub mod announce;
pub mod api;
pub mod classify;
pub mod commands;
pub mod config;
pub mod db;
pub mod decide;
pub mod dispatch;
pub mod error;
pub mod faq;
pub mod flood;
pub mod gateway;
pub mod llm;
pub mod pipeline;
pub mod signing;
pub mod similarity;
pub mod store;
pub mod summarize;

use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub store: Arc<store::ConfigStore>,
    pub faq: Arc<faq::FaqIndex>,
    pub processor: Arc<pipeline::MessageProcessor>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

//! WikiFacts: a daily encyclopedia fact, summarized and broadcast over WhatsApp.

pub mod api;
pub mod broadcast;
pub mod channels;
pub mod config;
pub mod content;
pub mod error;
pub mod job;
pub mod logging;
pub mod retry;
pub mod scheduler;
pub mod script;
pub mod session;
pub mod store;
pub mod summarizer;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

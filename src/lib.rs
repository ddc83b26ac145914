//! Formbot — a conversational form filler for Telegram.
//!
//! Asks a user a fixed sequence of questions, then fills a DOCX template
//! with the answers and sends the document back.

pub mod channels;
pub mod config;
pub mod error;
pub mod form;
pub mod render;
pub mod webhook;

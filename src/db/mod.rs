//! Database module for the VaaniAI server
//!
//! SQLite persistence for accounts, chat sessions, messages, the admin
//! upstream configuration and upstream usage logs.

pub mod models;
pub mod operations;

pub use models::{
    AdminApiConfig, ApiUsageLog, AuthToken, ChatSession, Message, NewMessage, Owner, Plan, Sender,
    User,
};
pub use operations::DbOperations;

//! Data models

mod email;

pub use email::{Address, DraftEmail, Message, SentReceipt};

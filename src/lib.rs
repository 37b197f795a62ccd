pub mod calculator;
pub mod config;
pub mod conversion;
pub mod format;
pub mod input;
pub mod key;
pub mod session;
pub mod tokenizer;

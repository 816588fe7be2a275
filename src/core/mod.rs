pub mod chat;
pub mod config;
pub mod cursor;
pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod runtime;
pub mod subscription;
pub mod terminal;

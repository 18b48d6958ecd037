pub mod admin;
pub mod config;
pub mod editor;
pub mod error;
pub mod hooks;
pub mod report;
pub mod runtime;
pub mod schema;
pub mod service;
pub mod store;
pub mod title;

pub mod config;
pub mod login;
pub mod runtime;
pub mod sync;

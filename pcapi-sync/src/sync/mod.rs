pub mod backoff;
mod conflict;
pub mod cursor;
pub mod download;
pub mod engine;
pub mod index;
pub mod paths;
pub mod queue;
pub mod transfer;
pub mod upload;

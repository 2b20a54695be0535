pub mod archive;
pub mod cache;
pub mod commands;
pub mod config;
pub mod graph;
pub mod index;
pub mod package;
pub mod retry;
pub mod runtime;
pub mod scan;

//! Overseer - supervised CLI-agent invocations for document review loops

pub mod commands;
pub mod config;
pub mod error;
pub mod extract;
pub mod probe;
pub mod procinfo;
pub mod reviewer;
pub mod supervisor;
pub mod telemetry;

//! Unit tests for hegemon-core.
//!
//! Backends are scripted in-process, except for sqlite which runs for real
//! against temporary files. No database server or network is needed.

pub mod backup;
pub mod compression;
pub mod restore;

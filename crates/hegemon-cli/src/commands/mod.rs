pub mod backup;
pub mod delete;
pub mod list;
pub mod prune;
pub mod restore;
pub mod schedule;
pub mod verify;

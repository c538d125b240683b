pub mod common;
pub mod consensus;
pub mod gpa;
pub mod network;

pub mod client;
pub mod launcher;

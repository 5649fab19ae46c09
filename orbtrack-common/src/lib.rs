///! Data model shared by the tracker backend and the snapshot server

mod types;

pub use types::*;

pub mod elements;
pub mod orbit;
pub mod publisher;
pub mod scheduled;
pub mod track;

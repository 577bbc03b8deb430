pub mod lead;
pub mod visit;

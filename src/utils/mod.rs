pub mod cors;
pub mod filename;

pub mod coordinate_system;
pub mod streaming;

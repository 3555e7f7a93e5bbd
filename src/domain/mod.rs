pub mod geo;
pub mod grid;

pub use geo::*;
pub use grid::*;

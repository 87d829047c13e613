//! CSV input loading and result export.

pub mod export;
pub mod input;

pub use export::{export_csv, write_csv};
pub use input::{load_elements, load_walls, load_weather, read_elements, read_walls, read_weather};

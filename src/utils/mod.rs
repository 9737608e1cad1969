pub mod size;

pub use size::{format_size, SizeUnit};

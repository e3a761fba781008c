mod images;
mod types;

pub use types::{Cli, ImageSource};

//! CLI commands module.

mod gallery;
mod replay;
mod util;

pub use gallery::GalleryCommand;
pub use replay::ReplayCommand;

pub(crate) use util::*;

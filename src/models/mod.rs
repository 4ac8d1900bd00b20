pub mod comic;
pub mod common;
pub mod image;
pub mod meme;
pub mod snapshot;

pub use comic::*;
pub use common::*;
pub use image::*;
pub use meme::*;
pub use snapshot::*;

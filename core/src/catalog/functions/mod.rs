pub mod calculator;
pub mod image_generation;

pub use calculator::Calculator;
pub use image_generation::ImageGeneration;

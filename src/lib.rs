#![cfg_attr(not(feature = "std"), no_std)]
mod error;
pub mod model;
#[cfg(feature = "train")]
pub mod training;

pub use error::{ModelError, Result};
pub use model::{
    activation::Activation,
    resnet::{InputShape, ResNet34, ResNet34Config},
};

extern crate alloc;

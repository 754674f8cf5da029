#![doc = include_str!("../README.md")]

mod descriptor;
mod error;
mod service;
mod types;

pub use descriptor::*;
pub use error::*;
pub use service::*;
pub use types::*;

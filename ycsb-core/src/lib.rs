pub mod runner;

pub use runner::{Error, Result};

pub mod config;
pub mod enrollment;
pub mod error;
pub mod outcome;

pub use config::Config;
pub use enrollment::*;
pub use error::*;
pub use outcome::*;

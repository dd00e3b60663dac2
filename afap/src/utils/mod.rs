pub mod fs;
pub use fs::*;

pub mod readers;
pub use readers::*;

pub mod hex;
pub use hex::*;

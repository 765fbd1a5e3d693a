#[cfg(feature = "cli")]
pub mod console;
pub mod writers;

//! Built-in effects that generate their shader source instead of loading it
//! from disk.

pub mod dots;

pub use dots::DotsSettings;

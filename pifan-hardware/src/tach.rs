//! Tachometer input line
//!
//! The counting itself is `pifan_core::TachometerCounter`; a backend only has
//! to feed it edges from whatever context the platform delivers them on and
//! stop doing so when detached.

use pifan_core::Result;

/// Backend for the fan's sense line
pub trait TachometerLine: Send {
    /// Stop edge delivery and free the line
    fn detach(&mut self) -> Result<()>;

    /// Short description for logs
    fn describe(&self) -> String;
}

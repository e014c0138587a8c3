//! Persisted block index and rescan locators.

pub mod encoding;
pub mod index;
pub mod locator;

pub type Hash256 = [u8; 32];

//! Domain services used by HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own workspace state, persistence, and pure image logic
//! so route handlers can stay focused on request translation and calling
//! backends.

pub mod gallery;
pub mod imaging;
pub mod mask;
pub mod persistence;
pub mod store;

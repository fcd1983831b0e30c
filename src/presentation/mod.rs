//! Server-rendered HTML presentation.

pub mod views;

//! Orbita: a server-rendered reading front-end for headless CMS backends.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;

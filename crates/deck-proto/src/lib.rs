//! Shared building blocks for trackdeck: configuration, platform paths,
//! the media model, catalog scanning, favourites persistence and the wire
//! protocol spoken over the control socket.

pub mod catalog;
pub mod config;
pub mod favourites;
pub mod media;
pub mod platform;
pub mod protocol;

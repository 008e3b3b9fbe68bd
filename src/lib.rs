#![allow(
    clippy::len_zero,
    clippy::needless_lifetimes,
    clippy::enum_variant_names,
    clippy::too_many_arguments
)]

#[macro_use]
mod macros;
pub mod attributes;
pub mod cli;
pub mod config;
pub mod connection;
pub mod device;
pub mod dpy;
pub mod events;
pub mod flip;
pub mod format;
pub mod framelock;
pub mod grant;
pub mod handle;
pub mod hardware;
pub mod logger;
pub mod mode;
pub mod modeset;
pub mod mux;
pub mod permissions;
pub mod rect;
pub mod server;
pub mod surface;
pub mod swapgroup;
pub mod utils;
pub mod vblank;

#[cfg(test)]
mod it;

//! A Discord bot that runs cooperative heists.
//!
//! Members pool money with `/heist amount:<n>`; the pool picks a target,
//! upgrades it as thresholds are crossed, counts down, and then runs the
//! heist. The engine in [`heist`] is transport-agnostic: it talks to the
//! outside world through the [`store::HeistStore`] and [`render::Presenter`]
//! traits. The Discord gateway and REST plumbing sit behind the `io`
//! feature.

pub mod clock;
pub mod commands;
pub mod config;
pub mod heist;
pub mod render;
pub mod store;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod events;
#[cfg(feature = "io")]
pub mod gateway;
#[cfg(feature = "io")]
pub mod handlers;
#[cfg(feature = "io")]
pub mod http;

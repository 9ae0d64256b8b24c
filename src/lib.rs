//! Field-service visit tracking.
//!
//! A visit only moves through its lifecycle when the device can prove where
//! it is: [`location`] acquires validated GPS positions, [`lifecycle`] gates
//! every transition on that evidence (plus photos, signatures or a reason),
//! persists through [`store`] and announces committed changes via [`notify`].

pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod location;
pub mod logging;
pub mod notify;
pub mod store;
pub mod ui;

pub use error::ServiceError;

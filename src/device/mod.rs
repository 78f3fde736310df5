//! Remote device integration module
//!
//! - `client`: HTTP client for the device backend's REST contract
//! - `sync`: Background polling and connection state tracking

pub mod client;
pub mod sync;

pub use client::{DeviceClient, Endpoint};
pub use sync::{DeviceSyncer, SyncEvent, SyncHandle, SyncOptions};

//! Bluetooth Module
//!
//! Client for the Mi Band GATT service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                         MiBand                           │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐  ┌───────────┐  ┌───────────────┐
//! │ Connection │  │  Catalog  │  │ Notifications │
//! │            │  │           │  │               │
//! │ - Picker   │  │ - Handles │  │ - Step stream │
//! │ - Link     │  │ - Reads   │  │               │
//! └─────┬──────┘  └─────┬─────┘  └───────┬───────┘
//!       └───────────────┼────────────────┘
//!                       ▼
//!         ┌──────────────────────────┐
//!         │ Transport (WinRT / mock) │
//!         └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Identifiers and payload decoders
//! - [`transport`] - Async GATT traits the rest of the module is written against
//! - [`catalog`] - Service/characteristic resolution and raw reads/writes
//! - [`connection`] - Device selection, connection and link-loss handling
//! - [`notifications`] - Step count notification stream
//! - [`service`] - Main service coordinator
//! - [`mock`] - In-memory transport

pub mod catalog;
pub mod connection;
pub mod mock;
pub mod notifications;
pub mod protocol;
#[cfg(windows)]
pub mod scanner;
pub mod service;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::MiBand;

//! Bluetooth Module
//!
//! Keeps the BLE link to the FungiForge peripheral alive and bridges
//! commands into it.
//!
//! ## Architecture
//!
//! ```text
//!  caller threads                         supervisor thread (tokio current_thread)
//! ┌──────────────┐   CommandRequest   ┌──────────────────────────────────────────┐
//! │ CommandBridge│ ─────────────────▶ │           ConnectionSupervisor           │
//! │  (blocking)  │ ◀───────────────── │  Scanner ─▶ Connection ─▶ monitor loop   │
//! └──────────────┘    reply/timeout   │                │              │          │
//!                                     │           BleTransport    Protocol       │
//!                                     └────────────────┬─────────────┬───────────┘
//!                                                      │             ▼
//!                                            WinRT / simulated  SharedStateCache
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame layouts, UUIDs, decoding and command encoding
//! - [`transport`] - The [`transport::BleTransport`] trait the supervisor drives
//! - [`scanner`] - Name-based device discovery
//! - [`connection`] - Connect and notification subscription
//! - [`supervisor`] - Reconnect state machine on the background thread
//! - [`bridge`] - Cross-thread command submission
//! - [`simulated`] - In-process fake peripheral
//! - `winrt` - Windows backend (Windows only)

pub mod bridge;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod simulated;
pub mod supervisor;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

pub use bridge::CommandBridge;
pub use simulated::SimulatedTransport;
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
pub use transport::BleTransport;
#[cfg(windows)]
pub use winrt::WinRtTransport;

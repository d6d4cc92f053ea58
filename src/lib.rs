//! # DCSS Data Handling Server
//!
//! This crate implements a beamline-side Data Handling Server (DHS) for the
//! DCSS control protocol used at synchrotron beamlines. A DHS connects out
//! to the central Data Collection Sequencer Server (DCSS), identifies
//! itself as a hardware server, accepts the operations the sequencer
//! assigns to it, and then executes start requests, reporting progress and
//! completion back over the same connection.
//!
//! ## Crate Structure
//!
//! - **`config`**: strongly-typed beamline settings loaded from a YAML file
//!   plus `DHS_` environment overrides.
//! - **`logging`**: tracing setup driven by the `-v` verbosity flag.
//! - **`error`**: the `DhsError` taxonomy used across the crate.
//! - **`protocol`**: the DCSS wire format: fixed 200-byte frames, typed
//!   inbound/outbound messages.
//! - **`dispatch`**: message-type → handler routing, bound once at startup.
//! - **`handshake`**: the connection handshake state machine and the
//!   handlers for the sequencer's control messages.
//! - **`registry`**: operation definitions and the lifecycle of in-flight
//!   operation instances.
//! - **`operations`**: the `OperationHandler` trait and worker plumbing.
//! - **`link`**: the TCP connection to DCSS (framing, FIFO writes).
//! - **`server`**: top-level lifecycle: initialize, connect, serve,
//!   orderly shutdown.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod link;
pub mod logging;
pub mod operations;
pub mod protocol;
pub mod registry;
pub mod server;

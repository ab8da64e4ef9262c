//! SMPP gateway core.
//!
//! Terminates TCP/TLS connections from ESMEs, drives the SMPP bind state
//! machine, and routes outbound submissions across a pool of upstream SMSC
//! peers with health tracking and retry scheduling.

pub mod auth;
pub mod config;
pub mod gateway;
pub mod pdu;
pub mod retry;
pub mod route;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod telemetry;

//! Core types shared across the transport.

pub mod neterror;

pub use neterror::NetError;

//! Protocol modules.
//!
//! Each module owns one concern of the gateway: rule-based TCP routing
//! with TLS termination, session-oriented UDP relaying, and
//! health-driven failover dispatch.

pub mod failover;
pub mod tcp_router;
pub mod udp_router;

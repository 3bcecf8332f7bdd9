//! # edgemux
//!
//! A protocol-aware L4 edge gateway core that multiplexes inbound TCP and
//! UDP traffic across handlers.
//!
//! ## Features
//!
//! - TCP routing on SNI and client IP rules (`HostSNI`, `ClientIP`,
//!   boolean combinators) with priority tie-breaks
//! - Non-destructive TLS ClientHello peeking with byte-exact replay
//! - TLS termination with per-SNI server configuration
//! - Session-oriented UDP relaying with idle timeouts, bounded
//!   request/response counts, and graceful shutdown
//! - Primary/failover dispatch driven by externally reported health
//!
//! ## Architecture
//!
//! Routing state is immutable after construction: a configuration reload
//! builds a fresh [`modules::tcp_router::TcpRouter`] and swaps it
//! atomically through a [`modules::tcp_router::RouterHandle`], so accept
//! loops never observe a half-updated route set. Each accepted TCP
//! connection and each UDP session runs on its own task.

pub mod config;
pub mod gateway;
pub mod modules;

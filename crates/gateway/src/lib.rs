//! Session-oriented gateway between browser WebSocket clients and a
//! fleet of game servers reached over persistent TCP connections.
//!
//! The first frame of a session (the login request) is routed by player
//! affinity and load; everything after it is relayed opaquely in both
//! directions.
//!
//! ## Architecture
//!
//! ```text
//! WebSocket clients ──► client handler (one task per socket)
//!                            │ login            │ relay
//!                            ▼                  ▼
//!                      session router ──► fleet registry ◄── discovery loop ◄── Consul
//!                            │                  │
//!                            ▼                  ▼
//!                       affinity KV      game server TCP conns
//!                         (Redis)               │
//!                                               ▼
//!                      upstream readers ──► client registry ──► WebSocket writers
//! ```
//!
//! ## Concurrency
//!
//! - Lock-free client registry (DashMap), RwLock fleet map swapped
//!   wholesale by discovery
//! - Every WebSocket and every game-server connection has exactly one
//!   writer: an unbounded channel + send task per socket, a mutex around
//!   each TCP write half
//! - No I/O under registry locks

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fleet;
pub mod router;
pub mod upstream;
pub mod ws_server;

pub use client::{ClientRegistry, ClientSession};
pub use config::Config;
pub use discovery::DiscoveryService;
pub use error::{GatewayError, Result};
pub use fleet::{FleetRegistry, GameServer};
pub use router::{AffinityLookup, FailingAffinity, StaticAffinity};
pub use ws_server::{create_router, AppState};

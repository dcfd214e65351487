//! Clients for the services the gateway depends on: Consul for the
//! game-server fleet view and Redis for the cross-gateway player
//! affinity map.

pub mod consul;
pub mod error;
pub mod redis_client;

pub use consul::{AgentService, ConsulClient, HealthCheck, ServiceEntry, Weights};
pub use error::{Error, Result};
pub use redis_client::{player_key, KvClient};

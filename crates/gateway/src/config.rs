//! Gateway configuration, read from the environment.

use std::env;
use std::fmt::Debug;
use std::str::FromStr;

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewaySection,
    pub consul: ConsulSection,
    pub redis: RedisSection,
    pub logger: LoggerSection,
}

#[derive(Debug, Clone)]
pub struct GatewaySection {
    pub host: String,
    pub ws_port: u16,
    pub metrics_port: u16,
    pub max_connections: usize,
    pub read_timeout_s: u64,
    pub write_timeout_s: u64,
}

#[derive(Debug, Clone)]
pub struct ConsulSection {
    pub address: String,
    pub service_name: String,
    pub query_interval_s: u64,
}

#[derive(Debug, Clone)]
pub struct RedisSection {
    pub address: String,
    pub password: String,
    pub db: i64,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct LoggerSection {
    pub level: String,
    pub file: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Debug,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

impl Config {
    /// Gather configuration from environment variables, falling back to
    /// local-development defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            gateway: GatewaySection {
                host: env_or("GATEWAY_HOST", "0.0.0.0"),
                ws_port: env_parse("GATEWAY_WS_PORT", 8080),
                metrics_port: env_parse("GATEWAY_METRICS_PORT", 9090),
                max_connections: env_parse("GATEWAY_MAX_CONNECTIONS", 10_000),
                read_timeout_s: env_parse("GATEWAY_READ_TIMEOUT_S", 60),
                write_timeout_s: env_parse("GATEWAY_WRITE_TIMEOUT_S", 10),
            },
            consul: ConsulSection {
                address: env_or("CONSUL_ADDRESS", "127.0.0.1:8500"),
                service_name: env_or("CONSUL_SERVICE_NAME", "game-server"),
                query_interval_s: env_parse("CONSUL_QUERY_INTERVAL_S", 60),
            },
            redis: RedisSection {
                address: env_or("REDIS_ADDRESS", "127.0.0.1:6379"),
                password: env_or("REDIS_PASSWORD", ""),
                db: env_parse("REDIS_DB", 0),
                pool_size: env_parse("REDIS_POOL_SIZE", 10),
            },
            logger: LoggerSection {
                level: env_or("LOG_LEVEL", "info"),
                file: env::var("LOG_FILE").ok().filter(|f| !f.is_empty()),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        // One test touches the process environment so parallel test
        // threads never race on these keys.
        let defaults = Config::from_env();
        assert_eq!(defaults.gateway.ws_port, 8080);
        assert_eq!(defaults.consul.service_name, "game-server");
        assert_eq!(defaults.redis.db, 0);
        assert_eq!(defaults.logger.level, "info");
        assert!(defaults.logger.file.is_none());

        env::set_var("GATEWAY_WS_PORT", "9001");
        env::set_var("CONSUL_SERVICE_NAME", "mines-fleet");
        env::set_var("GATEWAY_MAX_CONNECTIONS", "not-a-number");
        let overridden = Config::from_env();
        env::remove_var("GATEWAY_WS_PORT");
        env::remove_var("CONSUL_SERVICE_NAME");
        env::remove_var("GATEWAY_MAX_CONNECTIONS");

        assert_eq!(overridden.gateway.ws_port, 9001);
        assert_eq!(overridden.consul.service_name, "mines-fleet");
        // Unparseable values fall back to the default.
        assert_eq!(overridden.gateway.max_connections, 10_000);
    }
}

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tierbucket::cache::DEFAULT_MAX_ENTRIES;
use tierbucket::rate_limit::{DEFAULT_BURST_SIZE, DEFAULT_REFILL_INTERVAL};
use tierbucket::{BucketConfig, BucketConfigError, FailurePolicy, StandbyMode};
use tierbucket_redis::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT};

/// Configuration errors surfaced at startup.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },
    #[error(transparent)]
    Bucket(#[from] BucketConfigError),
    #[error("cannot resolve SERVER_HOST {host:?}: {reason}")]
    UnresolvableHost { host: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Shared tier; `None` runs the limiter on the local tier alone.
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    /// File holding the Redis password, re-read every `redis_password_reread`.
    pub redis_password_file: Option<PathBuf>,
    pub redis_password_reread: Duration,
    pub redis_key_prefix: Option<String>,
    pub redis_connect_timeout: Duration,
    pub redis_response_timeout: Duration,
    pub bucket: BucketConfig,
    /// JSON body field naming the caller on `POST /requests`.
    pub request_key_field: String,
    pub local_cache_max_entries: usize,
    pub failure_policy: FailurePolicy,
    pub standby_mode: StandbyMode,
}

impl ServerConfig {
    /// Load from the process environment after applying any `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let burst_size = parse_or(&get, "BUCKET_BURST_SIZE", DEFAULT_BURST_SIZE)?;
        let refill_secs =
            parse_or(&get, "BUCKET_REFILL_SECS", DEFAULT_REFILL_INTERVAL.as_secs())?;
        let redis_password = get("REDIS_PASSWORD");
        let redis_password_file = get("REDIS_PASSWORD_FILE").map(PathBuf::from);
        if let (Some(_), Some(file)) = (&redis_password, &redis_password_file) {
            return Err(invalid(
                "REDIS_PASSWORD_FILE",
                &file.display().to_string(),
                "set either REDIS_PASSWORD or REDIS_PASSWORD_FILE, not both",
            ));
        }

        Ok(Self {
            server_host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&get, "SERVER_PORT", 3000)?,
            redis_url: get("REDIS_URL"),
            redis_username: get("REDIS_USERNAME"),
            redis_password,
            redis_password_file,
            redis_password_reread: Duration::from_secs(positive(
                &get,
                "REDIS_PASSWORD_REREAD_SECS",
                60,
            )?),
            redis_key_prefix: get("REDIS_KEY_PREFIX"),
            redis_connect_timeout: Duration::from_millis(positive(
                &get,
                "REDIS_CONNECT_TIMEOUT_MS",
                millis(DEFAULT_CONNECT_TIMEOUT),
            )?),
            redis_response_timeout: Duration::from_millis(positive(
                &get,
                "REDIS_RESPONSE_TIMEOUT_MS",
                millis(DEFAULT_RESPONSE_TIMEOUT),
            )?),
            bucket: BucketConfig::new(burst_size, Duration::from_secs(refill_secs))?,
            request_key_field: get("REQUEST_KEY_FIELD").unwrap_or_else(|| "key".to_string()),
            local_cache_max_entries: parse_or(&get, "LOCAL_CACHE_MAX_ENTRIES", DEFAULT_MAX_ENTRIES)?,
            failure_policy: match get("FAILURE_POLICY").as_deref() {
                None | Some("open") => FailurePolicy::FailOpen,
                Some("closed") => FailurePolicy::FailClosed,
                Some(other) => return Err(invalid("FAILURE_POLICY", other, "expected open or closed")),
            },
            standby_mode: match get("STANDBY_MODE").as_deref() {
                None | Some("mirror") => StandbyMode::Mirror,
                Some("on-primary-failure") => StandbyMode::OnPrimaryFailure,
                Some(other) => {
                    return Err(invalid(
                        "STANDBY_MODE",
                        other,
                        "expected mirror or on-primary-failure",
                    ))
                }
            },
        })
    }
}

impl ServerConfig {
    /// Resolve `server_host:server_port` to the address to bind.
    ///
    /// Accepts IP literals and host names; a name takes its first resolved address.
    pub async fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let unresolvable = |reason: String| ConfigError::UnresolvableHost {
            host: self.server_host.clone(),
            reason,
        };
        let mut addrs = tokio::net::lookup_host((self.server_host.as_str(), self.server_port))
            .await
            .map_err(|e| unresolvable(e.to_string()))?;
        addrs.next().ok_or_else(|| unresolvable("no addresses found".to_string()))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn positive<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match parse_or(get, var, default)? {
        0 => Err(invalid(var, "0", "must be greater than zero")),
        value => Ok(value),
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { var, value: value.to_string(), reason: reason.to_string() }
}

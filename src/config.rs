use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `SLOTD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Only this login user may connect, if set.
    pub user: Option<String>,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// `id=Name;id=Name` space directory.
    pub spaces: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            user: None,
            password: "slotd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            spaces: None,
        }
    }
}

/// Parse a trimmed value; `None` when unset or unparseable.
fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let non_empty = |key: &str| get(key).filter(|s| !s.trim().is_empty());
        Self {
            bind: non_empty("SLOTD_BIND").unwrap_or(d.bind),
            port: parsed(&get, "SLOTD_PORT").unwrap_or(d.port),
            data_dir: non_empty("SLOTD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            user: non_empty("SLOTD_USER"),
            password: get("SLOTD_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&get, "SLOTD_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&get, "SLOTD_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: parsed(&get, "SLOTD_METRICS_PORT"),
            tls_cert: non_empty("SLOTD_TLS_CERT"),
            tls_key: non_empty("SLOTD_TLS_KEY"),
            spaces: non_empty("SLOTD_SPACES"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

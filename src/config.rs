use std::os::fd::RawFd;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Descriptor number of the first socket handed over by a socket-activating
/// supervisor (`SD_LISTEN_FDS_START`).
pub const INHERITED_LISTEN_FD: RawFd = 3;

/// How accepted connections are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One process, one connection at a time.
    Blocking,
    /// One acceptor, one thread per connection.
    Threaded,
    /// One acceptor, one forked child per connection.
    Forking,
    /// One process running a single reactor.
    #[serde(alias = "async")]
    Reactor,
    /// A pool of forked workers, each running its own reactor.
    Prefork,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" => Ok(Mode::Blocking),
            "threaded" => Ok(Mode::Threaded),
            "forking" => Ok(Mode::Forking),
            "reactor" | "async" => Ok(Mode::Reactor),
            "prefork" => Ok(Mode::Prefork),
            other => anyhow::bail!(
                "unknown server mode '{}' (expected blocking, threaded, forking, reactor or prefork)",
                other
            ),
        }
    }
}

/// Where the listening socket comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindSource {
    /// Create, configure and bind a new socket.
    Fresh {
        addr: String,
        backlog: i32,
        reuse_port: bool,
    },
    /// Adopt a descriptor that was opened by the parent process.
    Inherited(RawFd),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub mode: Mode,
    pub workers: usize,
    pub backlog: i32,
    pub reuse_port: bool,
    pub read_buffer_size: usize,
    pub poll_interval_ms: u64,
    pub write_timeout_ms: Option<u64>,
    pub server_name: Option<String>,
    pub server_software: String,
    pub log_level: String,
    #[serde(skip)]
    pub inherited_fd: Option<RawFd>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            mode: Mode::Prefork,
            workers: default_workers(),
            backlog: 128,
            reuse_port: false,
            read_buffer_size: 8192,
            poll_interval_ms: 500,
            write_timeout_ms: None,
            server_name: None,
            server_software: concat!("preforkd/", env!("CARGO_PKG_VERSION")).to_string(),
            log_level: "info".to_string(),
            inherited_fd: None,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Config {
    /// Loads the configuration from the YAML file named by `PREFORKD_CONFIG`
    /// (if any), then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let base = match std::env::var("PREFORKD_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path))?;
                Self::from_yaml_str(&raw).with_context(|| format!("parsing config file {}", path))?
            }
            Err(_) => Self::default(),
        };

        let cfg = base.with_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Same as [`Config::load`] without a file, reading variables through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cfg = Self::default().with_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn with_env<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("LISTEN") {
            self.listen_addr = addr;
        }
        if let Some(workers) = lookup("WORKERS") {
            self.workers = workers
                .parse()
                .with_context(|| format!("WORKERS must be a number, got '{}'", workers))?;
        }
        if let Some(mode) = lookup("SERVER_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        // Only presence matters: the socket is always the first inherited fd.
        if lookup("LISTEN_FDS").is_some() {
            self.inherited_fd = Some(INHERITED_LISTEN_FD);
        }
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.workers > 0, "workers must be at least 1");
        anyhow::ensure!(self.read_buffer_size > 0, "read_buffer_size must be at least 1");
        anyhow::ensure!(self.backlog > 0, "backlog must be positive");
        anyhow::ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be non-zero");
        anyhow::ensure!(self.write_timeout_ms != Some(0), "write_timeout_ms must be non-zero");
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| anyhow::anyhow!("invalid log level '{}'", self.log_level))?;
        Ok(())
    }

    pub fn bind_source(&self) -> BindSource {
        match self.inherited_fd {
            Some(fd) => BindSource::Inherited(fd),
            None => BindSource::Fresh {
                addr: self.listen_addr.clone(),
                backlog: self.backlog,
                reuse_port: self.reuse_port,
            },
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

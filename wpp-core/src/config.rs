use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

/// Reads the config file named explicitly by `--config-file`, falling back
/// to `./wpp.toml` in the current directory, else an all-default config.
#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = config_file {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config toml")?;
        config = toml::from_str(&config_str).context("parsing config file")?;
    } else {
        let config_path = PathBuf::from("wpp.toml");
        if config_path.exists() {
            info!("parsing ./wpp.toml");
            let config_str = fs::read_to_string(&config_path).context("reading config toml")?;
            config = toml::from_str(&config_str).context("parsing config file")?;
        }
    }

    Ok(config)
}

/// Server-wide configuration. Every field is optional so that an absent
/// config file, or a config file missing some keys, still produces a
/// usable all-default `Config` — CLI flags (see `wpp_core::Args`) are
/// merged on top and win when both a flag and a config key are given.
#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// Low end of the HTTP listen port range. The listener tries each port
    /// in `[listen_low, listen_high]` in turn.
    pub listen_low: Option<u16>,
    /// High end of the HTTP listen port range.
    pub listen_high: Option<u16>,

    /// TLS sibling port. Accepted for configuration completeness; TLS
    /// itself is an out-of-scope opaque stream codec (§1), so a value
    /// here is recorded but does not open a second listener.
    pub tls_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,

    /// Document root directory walked by URI resolution (§4.4).
    pub root: Option<String>,

    /// Virtual-host directory name used when the `Host` header does not
    /// match any `<name>.website` directory (§4.4 "Resource resolution").
    pub default_vhost: Option<String>,

    /// Path to a log file. When absent, logs go to stderr.
    pub log_file: Option<String>,

    /// Directory used by the IP-shunning convention (see SPEC_FULL.md).
    pub abuse_dir: Option<String>,

    /// `Cache-Control: max-age` seconds advertised for static files.
    pub max_age: Option<u64>,

    /// CPU-seconds limit enforced on CGI/JIT-CGI grandchildren via
    /// `setrlimit(RLIMIT_CPU, ...)`.
    pub cpu_seconds: Option<u64>,

    /// Maximum simultaneous per-connection children (§4.6); default 1000.
    pub max_child: Option<usize>,

    /// Disables the per-request timeout budget entirely (testing escape
    /// hatch; the original has an equivalent build-time toggle).
    pub no_timeout: Option<bool>,

    /// User to drop privileges to after binding the listen socket.
    pub user: Option<String>,

    /// Whether to `chroot` into `root` after binding (requires running as
    /// root; applied before the uid drop).
    pub chroot: Option<bool>,

    /// Restrict the listener to loopback addresses only.
    pub localhost_only: Option<bool>,

    /// Start page opened by the single-instance browser launch.
    pub start_page: Option<String>,

    /// Pidfile path (default `.pid`, matching the original's `PID_FILE`).
    pub pid_file: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use ntest::timeout;

    #[test]
    #[timeout(30000)]
    fn parse() -> anyhow::Result<()> {
        let cases = vec![
            r#"
            root = "/srv/www"
            listen_low = 8080
            listen_high = 8090
            "#,
            r#"
            max_child = 200
            chroot = true
            user = "nobody"
            "#,
            "",
        ];

        for case in cases.into_iter() {
            let _: Config = toml::from_str(case)?;
        }

        Ok(())
    }

    #[test]
    fn absent_config_file_yields_defaults() -> anyhow::Result<()> {
        let config = read_config(&None)?;
        assert_eq!(config.root, None);
        Ok(())
    }
}

//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "wardend", version, about = "Self-scaling worker pool daemon")]
pub struct Cli {
    /// TOML configuration file. `WARDEN_*` environment variables override it.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Serve the HTTP status surface on this port.
    #[arg(long)]
    pub status_port: Option<u16>,

    /// Address the status surface binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub status_bind: std::net::IpAddr,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["wardend"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.status_port.is_none());
        assert!(!cli.log_json);
        assert_eq!(cli.status_bind.to_string(), "0.0.0.0");
    }

    #[test]
    fn all_flags() {
        let cli = Cli::try_parse_from([
            "wardend",
            "--config",
            "/etc/warden.toml",
            "--status-port",
            "9090",
            "--status-bind",
            "127.0.0.1",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/warden.toml")));
        assert_eq!(cli.status_port, Some(9090));
        assert_eq!(cli.status_bind.to_string(), "127.0.0.1");
        assert!(cli.log_json);
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Cli::try_parse_from(["wardend", "--status-port", "99999"]).is_err());
    }
}

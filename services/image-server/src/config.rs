//! Image server configuration.
//!
//! Flags take precedence over the matching `IMGSRV_*` environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// Serve files, SquashFS images and block devices by content digest.
#[derive(Debug, Clone, Parser)]
#[command(name = "image-server")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Source to serve: a file, SquashFS image or block device. Repeatable.
    #[arg(
        long = "source",
        env = "IMGSRV_SOURCES",
        value_delimiter = ',',
        required = true
    )]
    pub sources: Vec<PathBuf>,

    /// TCP port to listen on.
    #[arg(long, env = "IMGSRV_PORT", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Prefix for HTTP URLs.
    #[arg(long, env = "IMGSRV_URL_PREFIX", default_value = "")]
    pub url_prefix: String,

    /// Address to bind.
    #[arg(long, env = "IMGSRV_LISTEN_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_host: IpAddr,

    /// Log level (trace, debug, info, warn, error). RUST_LOG wins if set.
    #[arg(long, env = "IMGSRV_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "IMGSRV_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repeated_sources() {
        let config = Config::try_parse_from([
            "image-server",
            "--source",
            "/srv/a.img",
            "--source",
            "/dev/sdb",
            "--port",
            "8080",
            "--url-prefix",
            "/img",
        ])
        .unwrap();

        assert_eq!(
            config.sources,
            vec![PathBuf::from("/srv/a.img"), PathBuf::from("/dev/sdb")]
        );
        assert_eq!(config.port, 8080);
        assert_eq!(config.url_prefix, "/img");
        assert_eq!(config.listen_addr(), "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn test_source_required() {
        assert!(Config::try_parse_from(["image-server", "--port", "8080"]).is_err());
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(
            Config::try_parse_from(["image-server", "--source", "a.img", "--port", "0"]).is_err()
        );
    }

    #[test]
    fn test_log_format_text() {
        let config = Config::try_parse_from([
            "image-server",
            "--source",
            "a.img",
            "--port",
            "1",
            "--log-format",
            "text",
            "--listen-host",
            "127.0.0.1",
        ])
        .unwrap();

        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.listen_addr(), "127.0.0.1:1".parse().unwrap());
    }
}

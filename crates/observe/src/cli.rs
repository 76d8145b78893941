//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser};

/// Correlate audit records from a local socket and forward them as spans.
#[derive(Debug, Parser)]
#[command(name = "audit-observe", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub backends: Backends,

    /// Path of the Unix socket the audit device writes to.
    #[arg(long, env = "SOCKET_PATH", default_value = "observe.sock")]
    pub socket_path: PathBuf,
}

/// Which senders are enabled. At least one is required.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct Backends {
    /// Send events to Honeycomb (requires HONEYCOMB_API_KEY).
    #[arg(long)]
    pub honeycomb: bool,

    /// Export spans to an OpenTelemetry collector over OTLP.
    #[arg(long, visible_alias = "zipkin")]
    pub otel: bool,

    /// Print events to stdout.
    #[arg(long)]
    pub debug: bool,
}

impl Backends {
    /// Return `true` if at least one sender is enabled.
    pub fn any(&self) -> bool {
        self.honeycomb || self.otel || self.debug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_backends_and_socket() {
        let cli = Cli::try_parse_from([
            "audit-observe",
            "--honeycomb",
            "--debug",
            "--socket-path",
            "/tmp/a.sock",
        ])
        .unwrap();
        assert!(cli.backends.honeycomb);
        assert!(cli.backends.debug);
        assert!(!cli.backends.otel);
        assert_eq!(cli.socket_path, PathBuf::from("/tmp/a.sock"));
    }

    #[test]
    fn zipkin_is_an_alias_for_otel() {
        let cli = Cli::try_parse_from(["audit-observe", "--zipkin"]).unwrap();
        assert!(cli.backends.otel);
    }

    #[test]
    fn no_flags_means_no_backends() {
        let cli = Cli::try_parse_from(["audit-observe"]).unwrap();
        assert!(!cli.backends.any());
    }
}

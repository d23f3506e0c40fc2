use crate::error::ConfigError;
use clap::{ArgAction, Parser};
use std::{path::PathBuf, time::Duration};

/// Startup values for this server, provided by arguments when the binary is invoked.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_help_flag = true)]
pub struct Arguments {
    /// host of the service that is being proxied (not needed with --http)
    #[arg(short = 'h', long)]
    pub host: Option<String>,

    /// port of the service that is being proxied
    #[arg(short, long, default_value = "119")]
    pub port: u16,

    /// port that the server will listen on (0 picks a free port)
    #[arg(short, long, default_value = "11119")]
    pub listen: u16,

    /// base name for log files, suffixed with a per-connection sequence number
    #[arg(short, long, default_value = "netlog")]
    pub base: PathBuf,

    /// don't write any log files
    #[arg(short, long)]
    pub nolog: bool,

    /// act like an HTTP proxy, connecting wherever the request line points
    #[arg(short = 'H', long)]
    pub http: bool,

    /// report connections and copy progress
    #[arg(short, long)]
    pub verbose: bool,

    /// seconds to wait for the HTTP request line (0 waits forever)
    #[arg(long, default_value = "30")]
    pub request_timeout: u64,

    /// seconds to wait for the upstream connection (0 waits forever)
    #[arg(long, default_value = "10")]
    pub connect_timeout: u64,

    /// seconds to let the upstream keep draining after the client is done
    #[arg(long, default_value = "5")]
    pub drain_timeout: u64,

    /// show this usage message
    #[arg(short = '?', long, action = ArgAction::Help)]
    pub help: Option<bool>,
}

/// How each Session finds its upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Every connection goes to the same destination
    Plain { host: String, port: u16 },
    /// The destination comes from each client's absolute-form request line
    HttpRewrite,
}

/// Immutable runtime configuration, shared by the listener and every session.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub mode: Mode,
    pub listen_port: u16,
    /// Base path for session logs, `None` when logging is disabled
    pub log_base: Option<PathBuf>,
    pub verbose: bool,
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub drain_timeout: Duration,
}

impl TryFrom<Arguments> for Configuration {
    type Error = ConfigError;

    fn try_from(arguments: Arguments) -> Result<Self, Self::Error> {
        let mode = if arguments.http {
            Mode::HttpRewrite
        } else {
            let host = arguments
                .host
                .filter(|host| !host.is_empty())
                .ok_or(ConfigError::MissingHost)?;
            Mode::Plain {
                host,
                port: arguments.port,
            }
        };

        Ok(Self {
            mode,
            listen_port: arguments.listen,
            log_base: (!arguments.nolog).then_some(arguments.base),
            verbose: arguments.verbose,
            request_timeout: seconds(arguments.request_timeout),
            connect_timeout: seconds(arguments.connect_timeout),
            drain_timeout: Duration::from_secs(arguments.drain_timeout),
        })
    }
}

// zero means "no deadline"
fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

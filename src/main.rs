use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use exchange_tap::{AmqpBroker, ConsoleSink, Reader, ReaderConfig, ReaderError};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Print messages published to an AMQP exchange.
#[derive(Debug, Parser)]
#[command(name = "exchange-tap", version)]
struct Args {
    /// AMQP connection string
    #[arg(short = 'c', long = "connection-string")]
    connection_string: String,

    /// Exchange name
    #[arg(short = 'e', long = "exchange")]
    exchange: String,

    /// Message format: json or messagepack
    #[arg(short = 'f', long, default_value = "json")]
    format: String,

    /// Output file path
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Append to the output file instead of truncating it
    #[arg(short = 'a', long)]
    append: bool,

    /// Text written after each message
    #[arg(short = 's', long)]
    separator: Option<String>,

    /// Message filter regexp, e.g. "EURUSD"
    #[arg(long)]
    filter: Option<String>,

    /// Routing key used to bind the queue
    #[arg(long, default_value = "")]
    routing_key: String,

    /// Seconds between reconnection attempts
    #[arg(long, default_value_t = 5)]
    reconnect_delay_secs: u64,

    /// Consecutive reconnection failures before an alarm (<= 0 disables)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    alarm_after: i32,
}

impl Args {
    fn into_config(self) -> Result<ReaderConfig, ReaderError> {
        let mut config = ReaderConfig::new(self.connection_string, self.exchange);
        config.format = self.format.parse()?;
        config.routing_key = self.routing_key;
        config.output_file = self.output;
        config.append_output = self.append;
        config.separator = self.separator;
        config.filter = self.filter;
        config.reconnect_delay = Duration::from_secs(self.reconnect_delay_secs);
        config.reconnect_alarm_threshold = self.alarm_after;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let (stop_tx, stop_rx) = bounded::<()>(1);
    install_stop_triggers(stop_tx);

    let reader = Reader::new(config, Arc::new(AmqpBroker::new()), ConsoleSink::new());
    let mut running = match reader.start() {
        Ok(running) => running,
        Err(e @ ReaderError::Connect(_)) => {
            println!("Failed to subscribe: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            println!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    running.notice("Press Enter or Ctrl-C to exit");
    running.wait(&stop_rx);
    let report = running.shutdown();
    info!(
        written = report.written,
        decode_failures = report.decode_failures,
        "exiting"
    );
    ExitCode::SUCCESS
}

/// Stop on Ctrl-C or on a line from stdin.
fn install_stop_triggers(stop: Sender<()>) {
    let on_signal = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = on_signal.try_send(());
    }) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    let spawned = thread::Builder::new()
        .name("stdin-stop".to_string())
        .spawn(move || {
            let mut line = String::new();
            // EOF (detached stdin) is not a stop request.
            if let Ok(n) = std::io::stdin().lock().read_line(&mut line) {
                if n > 0 {
                    let _ = stop.try_send(());
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not watch stdin");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_tap::MessageFormat;

    fn parse(extra: &[&str]) -> Result<ReaderConfig, ReaderError> {
        let mut argv = vec!["exchange-tap", "-c", "amqp://localhost", "-e", "quotes"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let result = parse(&["-f", "xml"]);
        assert!(matches!(result, Err(ReaderError::UnsupportedFormat(ref f)) if f == "xml"));
    }

    #[test]
    fn test_format_aliases() {
        assert_eq!(parse(&[]).unwrap().format, MessageFormat::Json);
        assert_eq!(parse(&["-f", "msgpack"]).unwrap().format, MessageFormat::MessagePack);
        assert_eq!(
            parse(&["--format", "compact-binary"]).unwrap().format,
            MessageFormat::MessagePack
        );
    }

    #[test]
    fn test_flags_reach_config() {
        let config = parse(&[
            "-o",
            "quotes.log",
            "-a",
            "-s",
            "---",
            "--filter",
            "EURUSD",
            "--routing-key",
            "fx.#",
            "--reconnect-delay-secs",
            "2",
            "--alarm-after",
            "3",
        ])
        .unwrap();

        assert_eq!(config.output_file, Some(PathBuf::from("quotes.log")));
        assert!(config.append_output);
        assert_eq!(config.separator.as_deref(), Some("---"));
        assert_eq!(config.filter.as_deref(), Some("EURUSD"));
        assert_eq!(config.routing_key, "fx.#");
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect_alarm_threshold, 3);
    }

    #[test]
    fn test_negative_alarm_threshold_disables_alarm() {
        let config = parse(&["--alarm-after", "-1"]).unwrap();
        assert_eq!(config.reconnect_alarm_threshold, -1);
    }

    #[test]
    fn test_zero_reconnect_delay_is_rejected() {
        let result = parse(&["--reconnect-delay-secs", "0"]);
        assert!(matches!(result, Err(ReaderError::Configuration(_))));
    }
}

use clap::Parser;

use turbocopy::cli::{Cli, Command};
use turbocopy::config::JobConfig;
use turbocopy::facade;
use turbocopy::logging::LogSink;

fn main() {
    let cli = Cli::parse();
    let log = match LogSink::init(cli.log_options()) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("failed to initialize logging: {}", e);
            std::process::exit(facade::EXIT_CONFIG_ERROR);
        }
    };

    let exit_code = match cli.command {
        Some(Command::Status { server_addr, server_port, server_connect_timeout_ms }) => {
            let config = JobConfig {
                server_addr: Some(server_addr),
                server_port,
                server_connect_timeout_ms,
                ..JobConfig::local("/status-probe".into(), "/status-probe".into())
            };
            facade::report_server_status(&config, &log)
        }
        None => match JobConfig::try_from(cli) {
            Ok(config) => {
                let (_, exit) = facade::process(config, &log);
                exit
            }
            Err(e) => {
                log.error(&format!("configuration error: {}", e));
                facade::EXIT_CONFIG_ERROR
            }
        },
    };

    std::process::exit(exit_code);
}

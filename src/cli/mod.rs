mod start;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::scheduler::rate_to_cron;
use crate::core::terminal::{self, print_error, print_status};

fn print_help() {
    terminal::print_banner();

    println!("{}", style("Commands").bold());
    print_status("start", "Run the gateway, control plane and configured functions");
    print_status("rate", "Show the cron expression a rate such as \"5 minutes\" becomes");
    print_status("help", "Show this message");

    println!("\n{}", style("Start flags").bold());
    print_status("--config <path>", "Config file (default: ./membrane.toml)");
    print_status("--host <addr>", "Interface both servers bind to");
    print_status("--gateway-port <port>", "Gateway port (default: 9001)");
    print_status("--control-port <port>", "Control plane port (default: 50051)");
    print_status("--no-functions", "Don't launch function containers");

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("membrane").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StartArgs {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub gateway_port: Option<u16>,
    pub control_port: Option<u16>,
    pub launch_functions: bool,
}

pub(crate) fn parse_start_args(args: &[String], start: usize) -> Result<StartArgs> {
    let mut parsed = StartArgs {
        launch_functions: true,
        ..StartArgs::default()
    };
    let mut i = start;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config" | "-c", Some(v)) => {
                parsed.config = Some(PathBuf::from(v));
                i += 2;
            }
            ("--host", Some(v)) => {
                parsed.host = Some(v.clone());
                i += 2;
            }
            ("--gateway-port", Some(v)) => {
                parsed.gateway_port = Some(
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("invalid gateway port '{}'", v))?,
                );
                i += 2;
            }
            ("--control-port", Some(v)) => {
                parsed.control_port = Some(
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("invalid control port '{}'", v))?,
                );
                i += 2;
            }
            ("--no-functions", _) => {
                parsed.launch_functions = false;
                i += 1;
            }
            (flag, None) if flag.starts_with("--") => {
                anyhow::bail!("missing value for {}", flag);
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "start" => {
            let parsed = parse_start_args(&args, 2)?;
            start::run_start(parsed).await
        }
        "rate" => {
            let Some(rate) = args.get(2) else {
                print_error("Usage: membrane rate \"<count> <minutes|hours|days>\"");
                return Ok(());
            };
            let cron = rate_to_cron(rate)?;
            print_status(rate, &cron);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            Ok(())
        }
    }
}

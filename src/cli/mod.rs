mod manager;
mod subscription;
mod worker;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::config::DEFAULT_API_PORT;
use crate::core::subscription::SubscriptionRequest;
use crate::core::terminal::{GuideSection, print_error};

fn print_help() {
    GuideSection::new("roombridge")
        .info("Relays chat room messages to webhooks and posts the replies back.")
        .blank()
        .command("manager", "Serve the subscription API backed by Docker")
        .command("subscription", "Add, remove or inspect subscriptions")
        .command("worker", "Run one relay loop from BRIDGE_* variables")
        .command("help", "Show this message")
        .print();

    GuideSection::new("Manager flags")
        .command("--config <path>", "Config file (default: ~/.roombridge/manager.toml)")
        .command("--api-host <host>", "Bind address (default: 127.0.0.1)")
        .command("--api-port <port>", "Bind port (default: 17990)")
        .print();

    println!(
        "\n {} {} <command> [subcommand] [flags]\n",
        style("Usage:").bold(),
        style("roombridge").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ManagerFlags {
    pub config: Option<PathBuf>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
}

pub(crate) fn parse_manager_flags(args: &[String], start: usize) -> ManagerFlags {
    let mut flags = ManagerFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    flags.api_host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    flags.api_port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

#[derive(Debug, Clone)]
pub(crate) struct SubscriptionFlags {
    pub request: SubscriptionRequest,
    pub api_url: String,
}

pub(crate) fn parse_subscription_flags(args: &[String], start: usize) -> SubscriptionFlags {
    let mut request = SubscriptionRequest::default();
    let mut api_url = format!("http://127.0.0.1:{}", DEFAULT_API_PORT);
    let mut i = start;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        let consumed = match (args[i].as_str(), value) {
            ("--api-key" | "-k", Some(v)) => {
                request.api_key = Some(v);
                true
            }
            ("--room" | "-r", Some(v)) => {
                request.room_id = Some(v);
                true
            }
            ("--sender" | "-s", Some(v)) => {
                request.sender = Some(v);
                true
            }
            ("--target" | "-t", Some(v)) => {
                request.target_url = Some(v);
                true
            }
            ("--interval" | "-i", Some(v)) => {
                request.poll_interval_secs = v.parse().ok();
                true
            }
            ("--api-url", Some(v)) => {
                api_url = v;
                true
            }
            _ => false,
        };
        i += if consumed { 2 } else { 1 };
    }
    SubscriptionFlags { request, api_url }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("");

    match cmd {
        "worker" => worker::run_worker().await,
        "manager" => manager::run_manager(parse_manager_flags(&args, 2)).await,
        "subscription" | "sub" => {
            let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
            subscription::run_subscription_command(sub_cmd, parse_subscription_flags(&args, 3))
                .await
        }
        "" | "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_manager_flags, parse_subscription_flags};
    use std::path::PathBuf;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_manager_flags_reads_config_host_and_port() {
        let args = argv(&[
            "roombridge",
            "manager",
            "--config",
            "/etc/roombridge.toml",
            "--api-host",
            "0.0.0.0",
            "--api-port",
            "19000",
        ]);
        let flags = parse_manager_flags(&args, 2);
        assert_eq!(flags.config, Some(PathBuf::from("/etc/roombridge.toml")));
        assert_eq!(flags.api_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(flags.api_port, Some(19000));
    }

    #[test]
    fn parse_manager_flags_ignores_bad_port_and_dangling_flag() {
        let args = argv(&["roombridge", "manager", "--api-port", "x", "--config"]);
        let flags = parse_manager_flags(&args, 2);
        assert_eq!(flags.api_port, None);
        assert_eq!(flags.config, None);
    }

    #[test]
    fn parse_subscription_flags_builds_request() {
        let args = argv(&[
            "roombridge",
            "subscription",
            "add",
            "--api-key",
            "k-123",
            "--room",
            "ops",
            "--sender",
            "Bridge Bot",
            "--target",
            "http://hooks.local/in",
            "--interval",
            "10",
            "--api-url",
            "http://127.0.0.1:18000",
        ]);
        let flags = parse_subscription_flags(&args, 3);
        assert_eq!(flags.request.api_key.as_deref(), Some("k-123"));
        assert_eq!(flags.request.room_id.as_deref(), Some("ops"));
        assert_eq!(flags.request.sender.as_deref(), Some("Bridge Bot"));
        assert_eq!(flags.request.target_url.as_deref(), Some("http://hooks.local/in"));
        assert_eq!(flags.request.poll_interval_secs, Some(10));
        assert_eq!(flags.api_url, "http://127.0.0.1:18000");
    }

    #[test]
    fn parse_subscription_flags_defaults_api_url() {
        let flags = parse_subscription_flags(&argv(&["roombridge", "subscription", "list"]), 3);
        assert_eq!(flags.api_url, "http://127.0.0.1:17990");
        assert!(flags.request.room_id.is_none());
    }
}

use anyhow::{Result, bail};
use console::style;
use serde_json::Value;

use crate::core::subscription::Subscription;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success, print_warn};

use super::SubscriptionFlags;

pub fn print_subscription_help() {
    GuideSection::new("roombridge subscription")
        .command("add", "Start relaying a room to a webhook")
        .command("remove", "Stop a relay and drop its cursor")
        .command("status", "Check whether a relay is running")
        .command("logs", "Show recent worker output")
        .command("list", "List active relays")
        .blank()
        .info("--api-key <key>  --room <id>  --sender <name>  --target <url>")
        .info("--interval <secs>  --api-url <url> (default: http://127.0.0.1:17990)")
        .print();
    println!();
}

async fn post(api_url: &str, path: &str, flags: &SubscriptionFlags) -> Result<Value> {
    let url = format!("{}{}", api_url.trim_end_matches('/'), path);
    let resp = reqwest::Client::new()
        .post(&url)
        .json(&flags.request)
        .send()
        .await;
    read_envelope(resp).await
}

async fn read_envelope(resp: reqwest::Result<reqwest::Response>) -> Result<Value> {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => bail!("Could not reach manager - {}. Is the manager running?", e),
    };
    let body: Value = resp.json().await?;
    if body.get("success").and_then(|v| v.as_bool()) != Some(true) {
        let err = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown error");
        bail!("{}", err);
    }
    Ok(body)
}

fn flag(body: &Value, key: &str) -> bool {
    body.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Describes the subscription locally so typos show up before any request.
fn describe(flags: &SubscriptionFlags) -> Result<String> {
    let sub = Subscription::try_from(flags.request.clone())?;
    Ok(sub.to_string())
}

pub async fn run_subscription_command(sub_cmd: &str, flags: SubscriptionFlags) -> Result<()> {
    match sub_cmd {
        "add" | "start" => {
            let label = describe(&flags)?;
            let body = post(&flags.api_url, "/api/subscriptions", &flags).await?;
            if flag(&body, "started") {
                print_success(&format!("Started {}", label));
            } else {
                print_info(&format!("Already running: {}", label));
            }
        }
        "remove" | "rm" | "stop" => {
            let label = describe(&flags)?;
            let body = post(&flags.api_url, "/api/subscriptions/remove", &flags).await?;
            if flag(&body, "stopped") {
                print_success(&format!("Stopped {}", label));
            } else {
                print_warn(&format!("No worker found for {}", label));
            }
        }
        "status" => {
            let label = describe(&flags)?;
            let body = post(&flags.api_url, "/api/subscriptions/status", &flags).await?;
            let state = if flag(&body, "running") {
                style("RUNNING").green().bold().to_string()
            } else {
                style("NOT RUNNING").dim().to_string()
            };
            GuideSection::new("Subscription")
                .status("Relay", &label)
                .status("State", &state)
                .print();
            println!();
        }
        "logs" => {
            describe(&flags)?;
            let body = post(&flags.api_url, "/api/subscriptions/logs", &flags).await?;
            match body.get("logs").and_then(|v| v.as_str()) {
                Some(text) => print!("{}", text),
                None => print_warn("No worker found for this subscription."),
            }
        }
        "list" | "ls" => {
            let url = format!("{}/api/subscriptions", flags.api_url.trim_end_matches('/'));
            let body = read_envelope(reqwest::Client::new().get(&url).send().await).await?;
            let subs = body
                .get("subscriptions")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let mut section = GuideSection::new("Active subscriptions");
            if subs.is_empty() {
                section = section.info("No active subscriptions.");
            }
            for sub in &subs {
                let field = |k: &str| sub.get(k).and_then(|v| v.as_str()).unwrap_or("?").to_string();
                section = section
                    .status(&field("room_id"), &format!("{} as {}", field("target_url"), field("sender")))
                    .info(&format!(
                        "key {} every {}s",
                        field("api_key"),
                        sub.get("poll_interval_secs").and_then(|v| v.as_u64()).unwrap_or(0)
                    ));
            }
            section.print();
            println!();
        }
        "" | "help" | "--help" | "-h" => print_subscription_help(),
        other => {
            print_error(&format!("Unknown subscription command: {}", other));
            print_subscription_help();
        }
    }
    Ok(())
}

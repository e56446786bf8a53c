//!
//! brigade client shell
//! --------------------
//! Interactive client for the brigade server: logs in, keeps the persisted
//! session warm, holds the realtime connection and prints the current
//! identity. Configuration via CLI flags and environment variables.

use anyhow::Result;
use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use brigade::cli::{Client, SessionState};

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn profile_dir() -> PathBuf {
    if let Ok(dir) = env::var("BRIGADE_PROFILE_DIR") {
        return PathBuf::from(dir);
    }
    let home = env::var("HOME").or_else(|_| env::var("USERPROFILE")).unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".brigade")
}

fn print_status(client: &Client) {
    match client.session.state() {
        SessionState::Authenticated(user) => {
            println!("logged in as {} <{}> role={}", user.name, user.email, user.role);
        }
        SessionState::Unauthenticated => println!("not logged in"),
        other => println!("session: {other:?}"),
    }
    println!("realtime: {}", if client.realtime_connected() { "connected" } else { "disconnected" });
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("warn"))
        .unwrap();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let base = parse_arg(&args, "--server")
        .or_else(|| env::var("BRIGADE_SERVER").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8090".to_string());

    let mut client = Client::new(&base, &profile_dir())?;
    client.bootstrap().await?;
    println!("brigade shell, server {base}");
    print_status(&client);
    println!("commands: login <email> <password> [--remember], me, refresh, logout, status, quit");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["login", email, password] | ["login", email, password, "--remember"] => {
                let remember = parts.len() == 4;
                match client.login(*email, *password, remember).await {
                    Ok(()) => print_status(&client),
                    Err(e) => println!("error: {e}"),
                }
            }
            ["me"] => {
                let Some(token) = client.session.token().map(|t| t.to_string()) else {
                    println!("not logged in");
                    continue;
                };
                match client.http.me(&token).await {
                    Ok(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                    Err(e) => println!("error: {e}"),
                }
            }
            ["refresh"] => match client.refresh().await {
                Ok(()) => println!("token refreshed"),
                Err(e) => println!("error: {e}"),
            },
            ["logout"] => {
                client.logout().await;
                print_status(&client);
            }
            ["status"] => print_status(&client),
            ["quit"] | ["exit"] => break,
            [] => {}
            other => println!("unknown command: {other:?}"),
        }
    }

    client.shutdown().await;
    Ok(())
}

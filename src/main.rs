mod backup;
mod config;
mod dashboard;
mod db;
mod error;
mod grading;
mod identity;
mod ipc;
mod logging;
mod models;
mod results;
mod store;

use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

fn main() {
    dotenv::dotenv().ok();
    let config = config::Config::from_env();

    if let Err(e) = logging::init_logging(&config.log_level) {
        eprintln!("{}", e);
    }

    let hasher = match identity::CredentialHasher::new(&config.password) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "invalid password hashing configuration");
            std::process::exit(2);
        }
    };

    let mut state = ipc::AppState::new(config, hasher);
    if let Some(path) = state.config.workspace.clone() {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            warn!(error = %format!("{e:#}"), "startup workspace could not be opened");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "srmsd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

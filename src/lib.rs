//! Orchestrates the demo application startup and component lifecycle.
//!
//! This library crate initializes configuration and concurrently runs the primary
//! services (SMTP, Health Check). It ensures that if any essential service
//! terminates unexpectedly, the entire application will shut down gracefully.
//!
//! The pluggable core itself lives in [`server`]/[`session`]/[`hooks`]; this
//! module only wires a runnable demo on top of it, the way the codebase this
//! crate was extracted from wired its own `run()`.

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod hooks;
pub mod memory_store;
pub mod message;
pub mod ratelimiter;
pub mod reader;
pub mod response;
pub mod server;
pub mod session;
pub mod session_view;
pub mod tls;
pub mod tracker;
pub mod webhook;

use std::env;
use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio::select;

use hooks::Collaborators;
use memory_store::InMemoryStore;
use webhook::WebhookStore;

/// Runs the main demo application logic.
///
/// Initializes and launches the SMTP and health check servers in separate asynchronous tasks.
/// It then monitors these tasks using `tokio::select!`. The application is designed to run
/// indefinitely. This function will only return if a critical error occurs in configuration
/// loading or if one of the essential server tasks terminates unexpectedly (either by
/// error, panic, or unexpected clean exit).
///
/// # Returns
///
/// - `Ok(())`: Should theoretically never return this in normal operation, as servers run indefinitely.
/// - `Err(anyhow::Error)`: If configuration loading fails, or if either the SMTP or health
///   check server task stops unexpectedly. The error indicates a fatal condition preventing
///   the application from continuing.
pub async fn run() -> Result<()> {
    info!(
        "Starting {} v{} inbound-SMTP server",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration; exit early if configuration is invalid or missing.
    let config = match config::ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e); // Propagate configuration error to main.rs for process exit.
        }
    };

    let health_bind_address =
        env::var("MAILCORE_HEALTH_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());
    let health_port: u16 = env::var("MAILCORE_HEALTH_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .map_err(|e| anyhow::anyhow!("MAILCORE_HEALTH_PORT must be a valid u16 port: {e}"))?;

    let store: Arc<dyn hooks::MessageStore> = match env::var("MAILCORE_WEBHOOK_URL") {
        Ok(url) => {
            info!("Config: forwarding accepted messages to webhook {}", url);
            Arc::new(WebhookStore::new(url))
        }
        Err(_) => {
            info!("Config: no webhook configured, accepted messages are kept in memory only");
            Arc::new(InMemoryStore::new())
        }
    };

    let smtp_server = Arc::new(server::Server::new(config, Collaborators::permissive(store)));
    let health_server = Arc::clone(&smtp_server);
    let smtp_server_for_signal = Arc::clone(&smtp_server);

    // Spawn the health check server task.
    let health_handle = tokio::spawn(async move {
        let _ = health_server; // keep the SMTP server's lifetime tied to this task too
        if let Err(e) = health::run_health_server(health_bind_address, health_port).await {
            error!("Health check server encountered a fatal error: {}", e);
            Err(e) // Propagate the error to the select! macro.
        } else {
            // A server task exiting without error is unexpected for a long-running service.
            Ok(()) // Signal this unexpected state to select! for error handling.
        }
    });

    // Spawn the main SMTP server task.
    let smtp_handle = tokio::spawn(async move {
        if let Err(e) = smtp_server.run().await {
             error!("SMTP server encountered a fatal error: {}", e);
             Err(e) // Propagate the error to the select! macro.
        } else {
             // A server task exiting without error is unexpected for a long-running service.
             Ok(()) // Signal this unexpected state to select! for error handling.
        }
    });

    // Monitor both server tasks concurrently, and race them against the
    // process's own shutdown signals (Ctrl+C, SIGTERM). `select!` waits for
    // the first of these to complete. For long-running services, a server
    // task completing on its own usually indicates an issue; only the
    // signal branch represents an orderly stop.
    select! {
        // `res` is Result<Result<()>, JoinError>
        // Outer Ok: Task finished normally (returned Ok or Err).
        // Outer Err: Task panicked or was cancelled.
        // Inner Ok: Task function returned Ok(()).
        // Inner Err: Task function returned an Err.
        res = health_handle => {
            error!("Health check server task terminated.");
            match res {
                Ok(Ok(())) => {
                    // Task completed without returning an error. This is unexpected for a
                    // persistent server, so we treat it as an application error.
                    Err(anyhow::anyhow!("Health check server exited cleanly, which is unexpected."))
                }
                Ok(Err(e)) => {
                    // Task completed and returned a specific error. Propagate it.
                    error!("Health check server returned error: {}", e);
                    Err(e)
                }
                Err(join_error) => {
                    // Task panicked or was cancelled. Wrap the JoinError.
                    error!("Health check server task failed (panic or cancellation): {}", join_error);
                    Err(anyhow::anyhow!("Health check server task failed: {}", join_error))
                }
            }
        },
        res = smtp_handle => {
            error!("SMTP server task terminated.");
             match res {
                Ok(Ok(())) => {
                    // Task completed without returning an error. Unexpected for the main server.
                    Err(anyhow::anyhow!("SMTP server exited cleanly, which is unexpected."))
                }
                Ok(Err(e)) => {
                    // Task completed and returned a specific error. Propagate it.
                    error!("SMTP server returned error: {}", e);
                    Err(e)
                }
                Err(join_error) => {
                    // Task panicked or was cancelled. Wrap the JoinError.
                    error!("SMTP server task failed (panic or cancellation): {}", join_error);
                    Err(anyhow::anyhow!("SMTP server task failed: {}", join_error))
                }
             }
        },
        () = wait_for_shutdown_signal() => {
            info!("Shutdown signal received, stopping gracefully");
            smtp_server_for_signal.shutdown().await;
            Ok(())
        },
    }
    // The Result (Ok or Err) from the completed branch in select! is returned.
    // Control should ideally not reach *past* the select! block in this setup.
}

/// Waits for either Ctrl+C or (on Unix) `SIGTERM`, whichever arrives first.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! Docker container running PostgreSQL with logical decoding enabled

use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

const IMAGE: &str = "postgres:16";

/// A throwaway PostgreSQL server for live replication tests
pub struct PostgresContainer {
    pub container_name: String,
    pub host_port: u16,
    pub connection_string: String,
}

impl PostgresContainer {
    pub fn new(container_name: &str, host_port: u16) -> Self {
        Self {
            container_name: container_name.to_string(),
            host_port,
            connection_string: format!(
                "host=localhost port={host_port} user=postgres password=postgres dbname=testdb",
            ),
        }
    }

    fn docker(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute docker {}", args.first().unwrap_or(&"")))
    }

    /// Start the container, replacing any leftover one with the same name
    pub fn start(&self) -> Result<()> {
        info!("Starting PostgreSQL container: {}", self.container_name);
        let _ = self.docker(&["rm", "-f", &self.container_name]);

        let port = format!("{}:5432", self.host_port);
        let output = self.docker(&[
            "run",
            "--name",
            &self.container_name,
            "-e",
            "POSTGRES_USER=postgres",
            "-e",
            "POSTGRES_PASSWORD=postgres",
            "-e",
            "POSTGRES_DB=testdb",
            "-p",
            &port,
            "-d",
            IMAGE,
            "postgres",
            "-c",
            "wal_level=logical",
            "-c",
            "max_wal_senders=10",
            "-c",
            "max_replication_slots=10",
        ])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to start container: {stderr}");
        }
        info!(
            "Started container {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    /// Wait until the server accepts queries
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match self.connect().await {
                Ok(_) => {
                    info!("PostgreSQL is ready");
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connection attempt failed: {e:#}");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        anyhow::bail!("PostgreSQL did not become ready within {timeout:?}")
    }

    /// Open a regular client connection
    pub async fn connect(&self) -> Result<Client> {
        let (client, connection) = tokio_postgres::connect(&self.connection_string, NoTls)
            .await
            .context("Failed to connect")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });
        client
            .execute("SELECT 1", &[])
            .await
            .context("Failed to execute test query")?;
        Ok(client)
    }

    pub fn stop(&self) -> Result<()> {
        info!("Stopping container: {}", self.container_name);
        let output = self.docker(&["rm", "-f", &self.container_name])?;
        if !output.status.success() {
            debug!(
                "Failed to remove container (may not exist): {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    pub fn get_logs(&self) -> Result<String> {
        let output = self.docker(&["logs", &self.container_name])?;
        Ok(format!(
            "STDOUT:\n{}\n\nSTDERR:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

impl Drop for PostgresContainer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

//! Feed actions.
//!
//! A [`Feeder`] performs the physical feeding for one schedule. The runtime
//! records the outcome; the feeder only reports success or failure.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use aquasense_core::config::FeederConfig;

use crate::error::FeedError;

/// One feeding to perform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedRequest<'a> {
    pub uid: &'a str,
    pub schedule_id: &'a str,
    /// Grams of feed.
    pub amount: f64,
}

pub trait Feeder: Send + Sync {
    fn feed(&self, request: &FeedRequest<'_>) -> impl Future<Output = Result<(), FeedError>> + Send;
}

/// Records feedings without driving hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFeeder;

impl Feeder for LoggingFeeder {
    async fn feed(&self, request: &FeedRequest<'_>) -> Result<(), FeedError> {
        info!(
            uid = request.uid,
            schedule_id = request.schedule_id,
            amount = request.amount,
            "Feeding"
        );
        Ok(())
    }
}

/// Runs an external program per feeding:
/// `program [args...] <uid> <schedule_id> <grams>`.
#[derive(Debug, Clone)]
pub struct CommandFeeder {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandFeeder {
    pub const fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }
}

impl Feeder for CommandFeeder {
    async fn feed(&self, request: &FeedRequest<'_>) -> Result<(), FeedError> {
        debug!(program = %self.program.display(), uid = request.uid, "Spawning feeder");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(request.uid)
            .arg(request.schedule_id)
            .arg(request.amount.to_string())
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| FeedError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FeedError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Feeder selected by configuration.
#[derive(Debug, Clone)]
pub enum FeederKind {
    Log(LoggingFeeder),
    Command(CommandFeeder),
}

impl From<&FeederConfig> for FeederKind {
    fn from(config: &FeederConfig) -> Self {
        match config {
            FeederConfig::Log => Self::Log(LoggingFeeder),
            FeederConfig::Command {
                program,
                args,
                timeout_secs,
            } => Self::Command(CommandFeeder::new(
                program.clone(),
                args.clone(),
                Duration::from_secs(*timeout_secs),
            )),
        }
    }
}

impl Feeder for FeederKind {
    async fn feed(&self, request: &FeedRequest<'_>) -> Result<(), FeedError> {
        match self {
            Self::Log(feeder) => feeder.feed(request).await,
            Self::Command(feeder) => feeder.feed(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: FeedRequest<'static> = FeedRequest {
        uid: "u1",
        schedule_id: "s1",
        amount: 12.5,
    };

    #[tokio::test]
    async fn logging_feeder_always_succeeds() {
        assert!(LoggingFeeder.feed(&REQUEST).await.is_ok());
    }

    #[tokio::test]
    async fn config_selects_feeder() {
        let kind = FeederKind::from(&FeederConfig::Log);
        assert!(matches!(kind, FeederKind::Log(_)));
        assert!(kind.feed(&REQUEST).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_feeder_passes_arguments() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("args");
        let feeder = CommandFeeder::new(
            PathBuf::from("sh"),
            vec![
                "-c".to_string(),
                format!("echo \"$@\" > {}", out.display()),
                "feeder".to_string(),
            ],
            Duration::from_secs(10),
        );
        feeder.feed(&REQUEST).await.unwrap();
        let written = std::fs::read_to_string(out).unwrap();
        assert_eq!(written.trim(), "u1 s1 12.5");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_feeder_reports_failure() {
        let feeder = CommandFeeder::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "echo jammed >&2; exit 3".to_string()],
            Duration::from_secs(10),
        );
        let err = feeder.feed(&REQUEST).await.unwrap_err();
        assert!(matches!(&err, FeedError::Failed(msg) if msg.contains("jammed")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_feeder_times_out() {
        let feeder = CommandFeeder::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let err = feeder.feed(&REQUEST).await.unwrap_err();
        assert!(matches!(&err, FeedError::Timeout(d) if *d == Duration::from_millis(100)));
        assert_eq!(err.to_string(), "Feeder timed out after 100ms");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let feeder = CommandFeeder::new(
            PathBuf::from("/nonexistent/feeder"),
            Vec::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            feeder.feed(&REQUEST).await.unwrap_err(),
            FeedError::Spawn(_)
        ));
    }
}

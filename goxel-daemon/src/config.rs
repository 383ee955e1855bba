//! Configuration & CLI. The daemon binary's flag surface, parsed with
//! `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CONFIG_INVALID: i32 = 1;
pub const EXIT_ALREADY_RUNNING: i32 = 2;
pub const EXIT_BIND_FAILURE: i32 = 3;
pub const EXIT_INTERNAL: i32 = 4;

#[derive(Debug, Parser)]
#[command(name = "goxel-daemond", about = "Daemon backend for a voxel editor")]
pub struct CliArgs {
    /// Stay attached to the controlling terminal instead of detaching.
    #[arg(long, conflicts_with = "daemonize")]
    pub foreground: bool,

    /// Detach from the controlling terminal (default if neither flag given).
    #[arg(long)]
    pub daemonize: bool,

    #[arg(long)]
    pub socket: Option<PathBuf>,

    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long = "queue-capacity")]
    pub queue_capacity: Option<usize>,

    #[arg(long = "render-dir")]
    pub render_dir: Option<PathBuf>,

    #[arg(long = "render-budget-bytes")]
    pub render_budget_bytes: Option<u64>,

    #[arg(long = "render-ttl-seconds")]
    pub render_ttl_seconds: Option<u64>,

    /// Structured logging verbosity, passed through to the
    /// `tracing-subscriber` env filter.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    #[arg(long = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: Option<u64>,

    #[arg(long = "idle-ms")]
    pub idle_ms: Option<u64>,

    #[arg(long = "max-connections")]
    pub max_connections: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub foreground: bool,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    pub render_dir: PathBuf,
    pub render_budget_bytes: u64,
    pub render_ttl_seconds: u64,
    pub log_level: String,
    pub shutdown_timeout_ms: u64,
    pub idle_ms: u64,
    pub max_connections: usize,
    pub max_frame_bytes: u32,
}

impl DaemonConfig {
    /// Applies documented defaults over whatever the CLI left unset.
    pub fn from_args(args: CliArgs, logical_cpus: usize) -> Self {
        DaemonConfig {
            foreground: args.foreground && !args.daemonize,
            socket: args.socket.unwrap_or_else(|| PathBuf::from("/tmp/goxel-daemon.sock")),
            pid_file: args.pid_file.unwrap_or_else(|| PathBuf::from("/tmp/goxel-daemon.pid")),
            workers: args
                .workers
                .unwrap_or_else(|| crate::workers::default_worker_count(logical_cpus)),
            queue_capacity: args.queue_capacity.unwrap_or(2048),
            render_dir: args.render_dir.unwrap_or_else(|| PathBuf::from("/tmp/goxel_renders/")),
            render_budget_bytes: args.render_budget_bytes.unwrap_or(512 * 1024 * 1024),
            render_ttl_seconds: args.render_ttl_seconds.unwrap_or(24 * 3600),
            log_level: args.log_level,
            shutdown_timeout_ms: args.shutdown_timeout_ms.unwrap_or(5000),
            idle_ms: args.idle_ms.unwrap_or(60_000),
            max_connections: args.max_connections.unwrap_or(256),
            max_frame_bytes: crate::wire::DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = CliArgs {
            foreground: false,
            daemonize: false,
            socket: None,
            pid_file: None,
            workers: None,
            queue_capacity: None,
            render_dir: None,
            render_budget_bytes: None,
            render_ttl_seconds: None,
            log_level: "info".to_string(),
            shutdown_timeout_ms: None,
            idle_ms: None,
            max_connections: None,
        };
        let config = DaemonConfig::from_args(args, 4);
        assert_eq!(config.socket, PathBuf::from("/tmp/goxel-daemon.sock"));
        assert_eq!(config.render_dir, PathBuf::from("/tmp/goxel_renders/"));
        assert_eq!(config.queue_capacity, 2048);
        assert_eq!(config.shutdown_timeout_ms, 5000);
        assert_eq!(config.idle_ms, 60_000);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn worker_count_clamps_even_when_derived_from_cpu_count() {
        let args = CliArgs {
            foreground: false,
            daemonize: false,
            socket: None,
            pid_file: None,
            workers: None,
            queue_capacity: None,
            render_dir: None,
            render_budget_bytes: None,
            render_ttl_seconds: None,
            log_level: "info".to_string(),
            shutdown_timeout_ms: None,
            idle_ms: None,
            max_connections: None,
        };
        let config = DaemonConfig::from_args(args, 1);
        assert_eq!(config.workers, 2);
    }
}

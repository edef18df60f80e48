// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;

use clap::{Parser, Subcommand};
use tracing::error;

pub mod config;
pub mod consts;
mod daemon;
pub mod http;
pub mod jit;
pub mod sqtp;
pub mod user;
pub mod vfs;

pub use daemon::server::ServerConfig;

/// Command line arguments `wpp` expects (§6.1). Mirrors the teacher's
/// `Args`/`Commands` split between a library-parseable struct and an enum
/// of subcommands.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Option<Commands>,

    #[clap(long, help = "Low end of the HTTP listen port range")]
    pub listen_low: Option<u16>,
    #[clap(long, help = "High end of the HTTP listen port range")]
    pub listen_high: Option<u16>,
    #[clap(long, help = "TLS sibling port (accepted, not bound; see SPEC_FULL.md)")]
    pub tls_port: Option<u16>,
    #[clap(long, help = "Path to a TLS certificate")]
    pub tls_cert: Option<String>,
    #[clap(long, help = "Path to a TLS private key")]
    pub tls_key: Option<String>,
    #[clap(long, help = "Document root directory")]
    pub root: Option<String>,
    #[clap(long, help = "Virtual-host directory used when Host matches none")]
    pub default_vhost: Option<String>,
    #[clap(short, long, help = "File to write logs to; stderr if absent")]
    pub log_file: Option<String>,
    #[clap(long, help = "Directory holding IP-shunning marker files")]
    pub abuse_dir: Option<String>,
    #[clap(long, help = "Cache-Control max-age seconds for static files")]
    pub max_age: Option<u64>,
    #[clap(long, help = "RLIMIT_CPU seconds applied to CGI/JIT-CGI children")]
    pub cpu_seconds: Option<u64>,
    #[clap(long, help = "Maximum simultaneous per-connection children")]
    pub max_child: Option<usize>,
    #[clap(long, action, help = "Disable the per-request timeout budget")]
    pub no_timeout: bool,
    #[clap(long, help = "User to drop privileges to after binding")]
    pub user: Option<String>,
    #[clap(long, action, help = "chroot into root before dropping privileges")]
    pub chroot: bool,
    #[clap(long, action, help = "Restrict the listener to loopback addresses")]
    pub localhost: bool,
    #[clap(long, help = "Start page opened by the single-instance browser launch")]
    pub page: Option<String>,
    #[clap(long, action, help = "TOML file containing configuration")]
    pub config_file: Option<String>,
    #[clap(short, long, action = clap::ArgAction::Count, help = "Show more in logs, may be provided multiple times")]
    pub verbose: u8,
    #[clap(long, help = "Pidfile path")]
    pub pid_file: Option<String>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy)]
pub enum Commands {
    #[default]
    #[clap(about = "Runs the server in the foreground (default)")]
    Run,
    #[clap(about = "Stops a running instance named by the pidfile")]
    Stop,
}

/// Runs `wpp` with the given arguments. Returns the process exit code
/// (§6.1: 0 clean shutdown/stop, 1 start or stop failure).
pub fn run(args: Args) -> i32 {
    let trace_level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    match args.log_file.clone() {
        Some(path) => match std::fs::File::create(&path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_max_level(trace_level)
                    .with_target(false)
                    .with_writer(std::sync::Mutex::new(file))
                    .init();
            }
            Err(e) => {
                eprintln!("failed to open log file {path}: {e}");
                return 1;
            }
        },
        None => {
            tracing_subscriber::fmt()
                .with_max_level(trace_level)
                .with_target(false)
                .with_writer(io::stderr)
                .init();
        }
    }

    let config = match config::read_config(&args.config_file) {
        Ok(c) => c,
        Err(e) => {
            error!("{:?}", e.context("reading config"));
            return 1;
        }
    };
    let server_config = ServerConfig::merge(config, &args);

    let result = match args.command.unwrap_or_default() {
        Commands::Run => daemon::run(server_config),
        Commands::Stop => daemon::stop(&server_config.pid_file),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:?}", e);
            1
        }
    }
}

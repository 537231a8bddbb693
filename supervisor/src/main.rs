//! Entry point for `ag-supervisor`, component H: spawns the configured
//! gateway children, reaps dead ones via SIGCHLD, and pulses the central
//! watchdog daemon with the live/dead id sets every `pulse_interval_secs`.

mod config;
mod error;
mod process;
mod pulse;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use process::ManagedChild;
use pulse::{PulseClient, PulseRequest};

#[derive(Parser, Debug)]
#[command(name = "ag-supervisor")]
struct Args {
    #[arg(long, default_value = "watchdog.conf")]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "ag-supervisor exiting");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), error::SupervisorError> {
    let args = Args::parse();
    let cfg = config::load_config(&args.config);

    if cfg.ag_list.is_empty() {
        return Err(error::SupervisorError::Config("ag_list is empty, nothing to supervise".to_string()));
    }

    let sigchld_flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGCHLD, sigchld_flag.clone())
        .map_err(|source| error::SupervisorError::Spawn { command: "signal_hook::register(SIGCHLD)".to_string(), source })?;

    let mut children: HashMap<u64, ManagedChild> = HashMap::new();
    let mut dead: Vec<u64> = Vec::new();

    for (idx, command_line) in cfg.ag_list.iter().enumerate() {
        let id = idx as u64;
        match process::spawn(id, command_line, cfg.ag_daemon_port) {
            Ok(managed) => {
                tracing::info!(id, pid = managed.pid(), port = managed.port, "spawned gateway child");
                children.insert(id, managed);
            }
            Err(err) => {
                tracing::error!(id, error = %err, "failed to spawn gateway child");
                dead.push(id);
            }
        }
    }

    let pulse_client = PulseClient::new(cfg.watchdog_pulse_url());
    let supervisor_id = format!("ag-supervisor-{}", std::process::id());

    loop {
        std::thread::sleep(Duration::from_secs(cfg.pulse_interval_secs));

        reap_dead_children(&sigchld_flag, &mut children, &mut dead);

        let live: Vec<u64> = children.keys().copied().collect();
        let request = PulseRequest { supervisor_id: supervisor_id.clone(), live, dead: dead.clone() };

        match pulse_client.send(&request) {
            Ok(response) => {
                for id in response.restart {
                    restart_child(id, &cfg, &mut children, &mut dead);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "pulse to watchdog daemon failed");
            }
        }
    }
}

/// Drains SIGCHLD-reported exits via `waitpid(WNOHANG)`, per spec §4.H: the
/// supervisor only reports dead ids, it does not restart children itself.
fn reap_dead_children(sigchld_flag: &AtomicBool, children: &mut HashMap<u64, ManagedChild>, dead: &mut Vec<u64>) {
    if !sigchld_flag.swap(false, Ordering::SeqCst) {
        return;
    }

    let exited: Vec<u64> = children
        .iter()
        .filter_map(|(&id, managed)| match waitpid(Pid::from_raw(managed.pid() as i32), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => Some(id),
            _ => None,
        })
        .collect();

    for id in exited {
        tracing::warn!(id, "gateway child exited");
        children.remove(&id);
        dead.push(id);
    }
}

fn restart_child(id: u64, cfg: &config::Config, children: &mut HashMap<u64, ManagedChild>, dead: &mut Vec<u64>) {
    let Some(command_line) = cfg.ag_list.get(id as usize) else {
        tracing::warn!(id, "watchdog requested restart of unknown child id");
        return;
    };

    match process::spawn(id, command_line, cfg.ag_daemon_port) {
        Ok(managed) => {
            tracing::info!(id, pid = managed.pid(), "restarted gateway child");
            children.insert(id, managed);
            dead.retain(|&d| d != id);
        }
        Err(err) => {
            tracing::error!(id, error = %err, "failed to restart gateway child");
        }
    }
}

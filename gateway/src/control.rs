//! [MODULE E] Event channel.
//!
//! A per-process named rendezvous point receiving fixed-width commands from
//! a local supervisor (spec §4.E), grounded in
//! `original_source/AG/AG-util.cpp`'s `FIFO_PREFIX`/`TERM`/`RCON` handling.
//! The reserved third opcode slot (`NR_CMDS=3` in the original, spec §9 open
//! question) is wired here to `STAT`, a read-only health dump — see
//! SPEC_FULL.md §6.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::{pthread_sigmask, SigmaskHow, SigSet};
use parking_lot::Mutex;

/// Default rendezvous path prefix, matching the original's
/// `FIFO_PREFIX "/tmp/syndicate-ag."`.
pub const FIFO_PREFIX: &str = "/tmp/ag-gateway.";

/// Every command frame is exactly this many bytes.
pub const CMD_LEN: usize = 4;

/// One extra opcode slot beyond `TERM`/`RCON`, per spec §9.
pub const NR_CMDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Term,
    Rcon,
    Stat,
}

impl Opcode {
    fn from_frame(frame: &[u8; CMD_LEN]) -> Option<Self> {
        match frame {
            b"TERM" => Some(Opcode::Term),
            b"RCON" => Some(Opcode::Rcon),
            b"STAT" => Some(Opcode::Stat),
            _ => None,
        }
    }

    fn as_frame(self) -> &'static [u8; CMD_LEN] {
        match self {
            Opcode::Term => b"TERM",
            Opcode::Rcon => b"RCON",
            Opcode::Stat => b"STAT",
        }
    }
}

pub type Handler = Box<dyn Fn() + Send + Sync>;

/// Returns the rendezvous path for `pid`.
pub fn channel_path(pid: u32) -> PathBuf {
    PathBuf::from(format!("{FIFO_PREFIX}{pid}"))
}

fn open_rw_nonblocking(path: &Path) -> io::Result<std::fs::File> {
    if !path.exists() {
        nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o640))
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// The dispatcher side: owns the FIFO, a small opcode -> handler table
/// (`NR_CMDS` slots, matching spec §4.E and §9), and the worker thread.
pub struct EventChannel {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    handlers: Mutex<HashMap<Opcode, Handler>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventChannel {
    pub fn open_for_pid(pid: u32) -> io::Result<Arc<Self>> {
        let path = channel_path(pid);
        let file = open_rw_nonblocking(&path)?;
        Ok(Arc::new(EventChannel {
            path,
            file: Mutex::new(file),
            handlers: Mutex::new(HashMap::with_capacity(NR_CMDS)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }))
    }

    pub fn register(&self, op: Opcode, handler: Handler) {
        self.handlers.lock().insert(op, handler);
    }

    /// Blocks all signals, then waits for readiness on the channel
    /// descriptor and dispatches fixed 4-byte frames. Any non-4-byte frame
    /// is dropped without coalescing, per spec §4.E.
    pub fn run(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        let handle = thread::spawn(move || this.dispatch_loop());
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }

    fn dispatch_loop(self: Arc<Self>) {
        let all_signals = SigSet::all();
        let _ = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&all_signals), None);

        let fd: RawFd = self.file.lock().as_raw_fd();
        let borrowed_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        while self.running.load(Ordering::SeqCst) {
            let mut fds = [PollFd::new(&borrowed_fd, PollFlags::POLLIN)];
            match poll(&mut fds, 200) {
                Ok(n) if n > 0 => self.drain_and_dispatch(),
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    fn drain_and_dispatch(&self) {
        let mut buf = [0u8; CMD_LEN];
        let mut file = self.file.lock();
        loop {
            match file.read(&mut buf) {
                Ok(CMD_LEN) => {
                    if let Some(op) = Opcode::from_frame(&buf) {
                        if let Some(handler) = self.handlers.lock().get(&op) {
                            handler();
                        }
                        // unregistered opcodes are silently dropped.
                    }
                }
                Ok(0) => break,
                Ok(_) => {
                    // short read: frame dropped, not coalesced.
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

/// The supervisor-side API: wakes a gateway's dispatcher by writing 4 bytes
/// to its channel, per spec §4.E.
pub struct Signaler;

impl Signaler {
    pub fn send(pid: u32, op: Opcode) -> io::Result<()> {
        let path = channel_path(pid);
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.write_all(op.as_frame())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn unique_pid() -> u32 {
        std::process::id() * 1000 + (std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos() % 1000)
    }

    #[test]
    fn term_command_invokes_registered_handler() {
        let pid = unique_pid();
        let channel = EventChannel::open_for_pid(pid).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        channel.register(Opcode::Term, Box::new(move || { c2.fetch_add(1, Ordering::SeqCst); }));
        channel.run();

        Signaler::send(pid, Opcode::Term).unwrap();
        thread::sleep(Duration::from_millis(300));
        channel.stop();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_opcode_is_silently_dropped() {
        let pid = unique_pid() + 1;
        let channel = EventChannel::open_for_pid(pid).unwrap();
        channel.run();
        Signaler::send(pid, Opcode::Stat).unwrap();
        thread::sleep(Duration::from_millis(200));
        channel.stop();
        // No panic, no handler invoked: nothing to assert beyond "did not crash".
    }

    #[test]
    fn short_frame_is_dropped_not_coalesced() {
        let pid = unique_pid() + 2;
        let channel = EventChannel::open_for_pid(pid).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        channel.register(Opcode::Rcon, Box::new(move || { c2.fetch_add(1, Ordering::SeqCst); }));
        channel.run();

        // write a 2-byte frame, then a full 4-byte frame
        {
            let mut f = OpenOptions::new().write(true).open(channel_path(pid)).unwrap();
            f.write_all(b"RC").unwrap();
        }
        thread::sleep(Duration::from_millis(100));
        Signaler::send(pid, Opcode::Rcon).unwrap();
        thread::sleep(Duration::from_millis(200));
        channel.stop();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

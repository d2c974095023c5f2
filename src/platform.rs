use anyhow::Result;
use crossbeam_channel::Sender;
use std::io::{self, Write};
use std::process;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

// Cross-platform signal handling
#[cfg(unix)]
use signal_hook::{consts::SIGINT, consts::SIGTERM, consts::SIGUSR1, iterator::Signals};

#[cfg(windows)]
use signal_hook::{consts::SIGINT, flag};

/// Standard Unix exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    SignalInt = 130,  // 128 + SIGINT (2)
    SignalPipe = 141, // 128 + SIGPIPE (13)
    SignalTerm = 143, // 128 + SIGTERM (15)
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }

    /// Exit code for a run that was stopped by a signal, if any
    pub fn from_termination_signal() -> Option<Self> {
        match TERMINATION_SIGNAL.load(Ordering::Relaxed) {
            0 => None,
            #[cfg(unix)]
            SIGTERM => Some(ExitCode::SignalTerm),
            _ => Some(ExitCode::SignalInt),
        }
    }
}

/// Signal that requested the shutdown, 0 if none
pub static TERMINATION_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Control messages broadcast by the signal handler to the engine supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ctrl {
    /// Stop accepting input and drain; a second stop signal exits the process
    Shutdown,
    /// Log the pending index and progress counters
    DumpPending,
}

/// Signal handler for graceful shutdown
pub struct SignalHandler {
    _handle: thread::JoinHandle<()>,
}

impl SignalHandler {
    /// Initialize signal handling - cross-platform
    pub fn new(ctrl_sender: Sender<Ctrl>) -> Result<Self> {
        #[cfg(unix)]
        {
            let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1])?;

            let sender = ctrl_sender.clone();
            let handle = thread::spawn(move || {
                let mut shutdown_count = 0;
                for sig in signals.forever() {
                    match sig {
                        SIGINT | SIGTERM => {
                            TERMINATION_SIGNAL.store(sig, Ordering::Relaxed);
                            shutdown_count += 1;
                            if shutdown_count > 1 {
                                tracing::warn!(signal = sig, "second stop signal, exiting now");
                                if sig == SIGTERM {
                                    ExitCode::SignalTerm.exit();
                                }
                                ExitCode::SignalInt.exit();
                            }
                            tracing::warn!(
                                signal = sig,
                                "stop signal received; draining queued lines (repeat to exit immediately)"
                            );
                            let _ = sender.send(Ctrl::Shutdown);
                        }
                        SIGUSR1 => {
                            let _ = sender.send(Ctrl::DumpPending);
                        }
                        _ => {
                            // Unknown signal - should not happen with our registration
                            tracing::warn!(signal = sig, "received unexpected signal");
                        }
                    }
                }
            });

            Ok(SignalHandler { _handle: handle })
        }

        #[cfg(windows)]
        {
            // Windows signal handling using flag-based approach
            let term_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
            flag::register(SIGINT, std::sync::Arc::clone(&term_flag))?;

            let sender = ctrl_sender.clone();
            let handle = thread::spawn(move || {
                let mut shutdown_count = 0;
                loop {
                    thread::sleep(std::time::Duration::from_millis(100));
                    if term_flag.swap(false, Ordering::Relaxed) {
                        TERMINATION_SIGNAL.store(SIGINT, Ordering::Relaxed);
                        shutdown_count += 1;
                        if shutdown_count > 1 {
                            ExitCode::SignalInt.exit();
                        }
                        let _ = sender.send(Ctrl::Shutdown);
                    }
                }
            });

            Ok(SignalHandler { _handle: handle })
        }
    }
}

/// Safe wrapper for writing to stdout that handles broken pipes and other I/O errors
pub struct SafeStdout {
    stdout: io::Stdout,
}

impl Default for SafeStdout {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeStdout {
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }

    /// Write a line to stdout, handling broken pipes gracefully (cross-platform)
    pub fn writeln(&mut self, data: &str) -> Result<()> {
        match writeln!(self.stdout, "{}", data) {
            Ok(()) => Ok(()),
            Err(e) if Self::is_broken_pipe(&e) => {
                // Broken pipe is normal in pipelines - exit quietly
                ExitCode::SignalPipe.exit();
            }
            Err(e) => Err(anyhow::anyhow!("Failed to write to stdout: {}", e)),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.stdout.flush() {
            Ok(()) => Ok(()),
            Err(e) if Self::is_broken_pipe(&e) => {
                ExitCode::SignalPipe.exit();
            }
            Err(e) => Err(anyhow::anyhow!("Failed to flush stdout: {}", e)),
        }
    }

    /// Cross-platform broken pipe detection
    fn is_broken_pipe(e: &io::Error) -> bool {
        #[cfg(unix)]
        {
            e.kind() == io::ErrorKind::BrokenPipe
        }
        #[cfg(windows)]
        {
            // On Windows, broken pipe manifests as different error codes
            e.kind() == io::ErrorKind::BrokenPipe
                || e.raw_os_error() == Some(232) // ERROR_NO_DATA "The pipe is being closed"
                || e.raw_os_error() == Some(109) // ERROR_BROKEN_PIPE "The pipe has been ended"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::InvalidUsage as i32, 2);
        assert_eq!(ExitCode::SignalInt as i32, 130);
        assert_eq!(ExitCode::SignalPipe as i32, 141);
        assert_eq!(ExitCode::SignalTerm as i32, 143);
    }

    #[test]
    fn test_no_termination_signal_initially() {
        assert_eq!(ExitCode::from_termination_signal(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_sigusr1_requests_pending_dump() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _handler = SignalHandler::new(tx).unwrap();

        signal_hook::low_level::raise(SIGUSR1).unwrap();

        let ctrl = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("handler should forward SIGUSR1");
        assert_eq!(ctrl, Ctrl::DumpPending);
        assert_eq!(ExitCode::from_termination_signal(), None);
    }
}

use std::fs::OpenOptions;
use std::process::{Child, Command, Stdio};
use std::{fmt, io};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use tracing::debug;

use super::RoleCommand;

/// Starts the processes of the cluster roles
pub trait ProcessLauncher: fmt::Debug + Send + Sync {
    fn launch(&self, command: &RoleCommand) -> io::Result<Box<dyn RunningProcess>>;
}

/// A started process
pub trait RunningProcess: Send {
    fn id(&self) -> u32;

    /// Ask the process to terminate, without waiting for it
    fn terminate(&mut self) -> io::Result<()>;
}

/// Launches real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn launch(&self, command: &RoleCommand) -> io::Result<Box<dyn RunningProcess>> {
        let output = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&command.output_path)?;

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::inherit())
            .stdout(output.try_clone()?)
            .stderr(output)
            .spawn()?;

        debug!(role = %command.role, pid = child.id(), "Process started");
        Ok(Box::new(OsProcess { child }))
    }
}

struct OsProcess {
    child: Child,
}

impl RunningProcess for OsProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn terminate(&mut self) -> io::Result<()> {
        // already gone; nothing to do
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.signal_terminate()
    }
}

impl OsProcess {
    #[cfg(unix)]
    fn signal_terminate(&mut self) -> io::Result<()> {
        let pid = i32::try_from(self.child.id())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM)?;
        Ok(())
    }

    /// No SIGTERM outside of unix
    #[cfg(not(unix))]
    fn signal_terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::node::Role;
    use std::time::{Duration, Instant};

    #[test]
    fn sigterm_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let command = RoleCommand {
            role: Role::Agent,
            port: 4001,
            dir: dir.path().to_owned(),
            program: "sleep".into(),
            args: vec!["30".into()],
            output_path: dir.path().join("out.log"),
        };

        let mut process = OsLauncher.launch(&command).unwrap();
        assert!(0 < process.id());
        process.terminate().unwrap();

        let pid = Pid::from_raw(i32::try_from(process.id()).unwrap());
        let start = Instant::now();
        loop {
            match nix::sys::wait::waitpid(pid, None) {
                Ok(status) => {
                    assert!(matches!(
                        status,
                        nix::sys::wait::WaitStatus::Signaled(_, Signal::SIGTERM, _)
                    ));
                    break;
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => panic!("waitpid failed: {e}"),
            }
        }
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}

#![allow(dead_code)]

use anyhow::{bail, Result};
use starterd::{
    BootstrapOutcome, BootstrapState, Node, NodeCtrl, NodeResult, Parameters, ProcessLauncher,
    Role, RoleCommand, RunningProcess,
};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);
const STATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Launched(RoleCommand),
    Terminated(Role),
}

/// Records what would have been started instead of starting it
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingLauncher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn launched(&self) -> Vec<RoleCommand> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Launched(command) => Some(command),
                Event::Terminated(_) => None,
            })
            .collect()
    }

    pub fn terminated(&self) -> Vec<Role> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Terminated(role) => Some(role),
                Event::Launched(_) => None,
            })
            .collect()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn launch(&self, command: &RoleCommand) -> io::Result<Box<dyn RunningProcess>> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Launched(command.clone()));
        Ok(Box::new(RecordedProcess {
            role: command.role,
            events: self.events.clone(),
        }))
    }
}

struct RecordedProcess {
    role: Role,
    events: Arc<Mutex<Vec<Event>>>,
}

impl RunningProcess for RecordedProcess {
    fn id(&self) -> u32 {
        1
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Terminated(self.role));
        Ok(())
    }
}

pub struct TestStarterd {
    work_dir: tempfile::TempDir,
    params: Parameters,
    launcher: Arc<RecordingLauncher>,
    node: Option<Node>,
    node_ctrl: NodeCtrl,
}

impl TestStarterd {
    /// Node joining the master at `join`, or a master if `None`
    pub fn new(agency_size: usize, join: Option<String>) -> Result<Self> {
        Self::in_dir(tempfile::tempdir()?, agency_size, join)
    }

    pub fn master(agency_size: usize) -> Result<Self> {
        Self::new(agency_size, None)
    }

    pub fn joining(agency_size: usize, master: &TestStarterd) -> Result<Self> {
        Self::new(agency_size, Some(master.join_addr()))
    }

    pub fn in_dir(
        work_dir: tempfile::TempDir,
        agency_size: usize,
        join: Option<String>,
    ) -> Result<Self> {
        let launcher = Arc::new(RecordingLauncher::default());
        let params = Parameters::builder()
            .work_dir(work_dir.path().to_owned())
            .listen(SocketAddr::from_str("127.0.0.1:0")?)
            .agency_size(agency_size)
            .join(join)
            .poll_interval(POLL_INTERVAL)
            .shutdown_grace(SHUTDOWN_GRACE)
            .request_timeout(Duration::from_secs(2))
            .launcher(launcher.clone())
            .build();
        let node = Node::new(params.clone())?;
        let node_ctrl = node.get_ctrl();
        Ok(Self {
            work_dir,
            params,
            launcher,
            node: Some(node),
            node_ctrl,
        })
    }

    pub fn ctrl(&self) -> &NodeCtrl {
        &self.node_ctrl
    }

    pub fn launcher(&self) -> &RecordingLauncher {
        &self.launcher
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.node_ctrl.local_addr()
    }

    /// What peers pass to join this node
    pub fn join_addr(&self) -> String {
        format!("127.0.0.1:{}", self.local_addr().port())
    }

    pub fn hello_url(&self) -> String {
        format!("http://{}/hello", self.join_addr())
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn directory_name(&self) -> String {
        self.params.directory_name()
    }

    pub fn client(&self) -> Result<starter::Client> {
        Ok(starter::Client::new(
            &self.join_addr(),
            Duration::from_secs(2),
        )?)
    }

    pub async fn wait_for_state(&self, state: BootstrapState) -> Result<()> {
        let start = Instant::now();
        while self.node_ctrl.state() != state {
            if STATE_TIMEOUT < start.elapsed() {
                bail!(
                    "node stuck in {} while waiting for {}",
                    self.node_ctrl.state(),
                    state
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }

    /// Wait until `count` peers are known
    pub async fn wait_for_peers(&self, count: usize) -> Result<()> {
        let start = Instant::now();
        while self.node_ctrl.directory().len() < count {
            if STATE_TIMEOUT < start.elapsed() {
                bail!(
                    "only {} peers while waiting for {}",
                    self.node_ctrl.directory().len(),
                    count
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }

    /// Stop the node and wait until it's done
    pub async fn finish(&mut self) -> NodeResult<BootstrapOutcome> {
        self.node_ctrl.stop();
        self.wait().await
    }

    /// Wait for the node to end by itself
    pub async fn wait(&mut self) -> NodeResult<BootstrapOutcome> {
        let node = self.node.take().expect("node already finished");
        tokio::task::spawn_blocking(move || node.wait())
            .await
            .expect("node panicked")
    }

    /// Start a fresh node with the same parameters and working directory
    pub fn restart(&mut self) -> Result<()> {
        if self.node.is_some() {
            bail!("node still running");
        }
        let node = Node::new(self.params.clone())?;
        self.node_ctrl = node.get_ctrl();
        self.node = Some(node);
        Ok(())
    }
}

impl Drop for TestStarterd {
    fn drop(&mut self) {
        self.node_ctrl.stop()
    }
}

/// Address nobody listens on
pub fn closed_addr() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(format!("127.0.0.1:{port}"))
}

pub fn ports_of(commands: &[RoleCommand]) -> Vec<(Role, u16)> {
    commands.iter().map(|c| (c.role, c.port)).collect()
}

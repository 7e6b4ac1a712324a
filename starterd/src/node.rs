mod command;
mod coordinator;
mod discovery;
mod process;
mod supervisor;

pub use self::command::*;
pub use self::process::*;
pub use self::supervisor::*;

use crate::executable::Installation;
use crate::node::coordinator::Coordinator;
use crate::node::discovery::DiscoveryHandler;
use crate::setup::{SetupError, SetupStore};
use crate::task::PanicGuard;
use derive_more::Display;
use num_enum::{FromPrimitive, IntoPrimitive};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use starterd_api::{split_host_port, PeerDirectory, DEFAULT_LAUNCHER_PORT, LOCALHOST};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use typed_builder::TypedBuilder;

/// Parameters of runtime operation
#[derive(TypedBuilder, Debug, Clone)]
pub struct Parameters {
    /// Working root: holds `setup.json` and one directory per started role
    pub work_dir: PathBuf,

    #[builder(default = Parameters::DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Number of agents; fixed by the master and adopted by everyone joining
    #[builder(default = Parameters::DEFAULT_AGENCY_SIZE)]
    pub agency_size: usize,

    /// Non-agent roles to run locally
    #[builder(default)]
    pub roles: RoleFlags,

    #[builder(default = PathBuf::from(Installation::DEFAULT_ARANGOD))]
    pub arangod: PathBuf,
    #[builder(default = PathBuf::from(Installation::DEFAULT_JS_DIR))]
    pub js_dir: PathBuf,
    /// Run the database under this wrapper (e.g. `rr`)
    #[builder(default)]
    pub rr_path: Option<PathBuf>,
    /// Log level written into configuration files of started processes
    #[builder(default = Parameters::DEFAULT_LOG_LEVEL.to_owned())]
    pub log_level: String,

    /// `host[:port]` of the master to join; none means we're the master
    #[builder(default)]
    pub join: Option<String>,
    /// Host we register ourselves under before anyone contacted us
    #[builder(default)]
    pub own_address: Option<String>,

    #[builder(default = Parameters::DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,
    /// Time between stopping dependent roles and stopping the agent
    #[builder(default = Parameters::DEFAULT_SHUTDOWN_GRACE)]
    pub shutdown_grace: Duration,
    #[builder(default = starter::Client::DEFAULT_TIMEOUT)]
    pub request_timeout: Duration,

    #[builder(default = Arc::new(OsLauncher))]
    pub launcher: Arc<dyn ProcessLauncher>,
}

impl Parameters {
    pub const DEFAULT_LISTEN_ADDR: SocketAddr =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_LAUNCHER_PORT);
    pub const DEFAULT_AGENCY_SIZE: usize = 3;
    pub const DEFAULT_LOG_LEVEL: &'static str = "INFO";
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

    /// Our working directory as announced to other peers
    pub fn directory_name(&self) -> String {
        self.work_dir.to_string_lossy().into_owned()
    }

    /// `host:port` of the master, if we are to join one
    ///
    /// Without an explicit port, the master is expected on our own port.
    pub fn master_addr(&self) -> Option<MasterAddr> {
        self.join.as_deref().map(|join| {
            let (host, port) = split_host_port(join);
            MasterAddr {
                host: host.to_owned(),
                port: port.unwrap_or(self.listen.port()),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display(fmt = "{}:{}", host, port)]
pub struct MasterAddr {
    pub host: String,
    pub port: u16,
}

/// Bootstrap progress of a node
///
/// `Running` is terminal: nothing ever leaves it.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive, Display,
)]
#[repr(u8)]
pub enum BootstrapState {
    /// Role not decided yet
    #[default]
    Start,
    /// First instance, collecting join requests
    Master,
    /// Joined a master, waiting for enough peers
    Slave,
    /// Membership agreed; processes started
    Running,
}

impl BootstrapState {
    pub fn can_transition_to(self, next: BootstrapState) -> bool {
        use BootstrapState::*;
        matches!(
            (self, next),
            (Start, Master) | (Start, Slave) | (Start, Running) | (Master, Running) | (Slave, Running)
        )
    }
}

/// How the run of a node ended
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Stopped before peers converged; nothing persisted, nothing started
    Aborted,
    /// Ran the cluster processes until stopped
    Finished { resumed: bool },
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not join the cluster: {0}")]
    Join(#[source] starter::Error),
    #[error("setup error: {0}")]
    Setup(#[from] SetupError),
    #[error("agency size must be at least 1")]
    InvalidAgencySize,
}

pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Why a join request was refused
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("{0}")]
    Directory(#[from] starterd_api::DirectoryError),
    #[error("Role of this node is not decided yet.")]
    NotReady,
    #[error("Cluster membership is already fixed.")]
    MembershipFixed,
    #[error("This node is not the master.")]
    NotMaster,
}

pub struct NodeShared {
    params: Parameters,

    is_node_shutting_down: Arc<AtomicBool>,

    state: AtomicU8,

    /// All reads and writes of the directory go through this lock
    peers: Mutex<PeerDirectory>,

    /// Fired once, when the number of registered peers reaches agency size
    converged_tx: flume::Sender<()>,

    setup: SetupStore,
}

impl NodeShared {
    fn new(params: Parameters, converged_tx: flume::Sender<()>) -> Self {
        Self {
            is_node_shutting_down: Arc::new(AtomicBool::new(false)),
            state: AtomicU8::new(BootstrapState::Start.into()),
            peers: Mutex::new(PeerDirectory::new(params.agency_size)),
            converged_tx,
            setup: SetupStore::new(&params.work_dir),
            params,
        }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn setup(&self) -> &SetupStore {
        &self.setup
    }

    pub fn panic_guard(&self, name: &'static str) -> PanicGuard {
        PanicGuard::new(name, self.is_node_shutting_down.clone())
    }

    pub fn is_node_shutting_down(&self) -> bool {
        self.is_node_shutting_down.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> BootstrapState {
        BootstrapState::from(self.state.load(Ordering::SeqCst))
    }

    /// Move to `next`, unless not allowed from the current state
    pub fn transition(&self, next: BootstrapState) -> bool {
        let res = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                BootstrapState::from(current)
                    .can_transition_to(next)
                    .then_some(next.into())
            });
        match res {
            Ok(prev) => {
                info!(from = %BootstrapState::from(prev), to = %next, "State change");
                true
            }
            Err(current) => {
                warn!(current = %BootstrapState::from(current), to = %next, "Invalid state change");
                false
            }
        }
    }

    pub fn directory(&self) -> PeerDirectory {
        self.peers.lock().expect("Locking failed").clone()
    }

    /// Register ourselves if nobody did yet, see [`PeerDirectory::init_self`]
    pub fn init_self_if_empty(&self, host: &str) {
        let mut peers = self.peers.lock().expect("Locking failed");
        if peers.init_self(host, &self.params.directory_name()) {
            info!(host, "Registered self as the first peer");
            self.notify_if_converged(&peers);
        }
    }

    /// Append a peer that sent a join request
    ///
    /// The state is checked under the directory lock, so no peer can sneak
    /// in after the directory was frozen by [`Self::enter_running`].
    pub fn register_peer(
        &self,
        host: &str,
        directory: &str,
    ) -> Result<PeerDirectory, RegisterError> {
        let mut peers = self.peers.lock().expect("Locking failed");
        match self.state() {
            BootstrapState::Master => {}
            BootstrapState::Start => return Err(RegisterError::NotReady),
            BootstrapState::Running => return Err(RegisterError::MembershipFixed),
            BootstrapState::Slave => return Err(RegisterError::NotMaster),
        }

        let index = peers.register(host, directory)?;
        info!(
            host,
            directory,
            index,
            port_offset = %peers.peers()[index].port_offset,
            "New peer"
        );
        self.notify_if_converged(&peers);
        Ok(peers.clone())
    }

    fn notify_if_converged(&self, peers: &PeerDirectory) {
        if peers.len() != peers.agency_size() {
            return;
        }
        match self.converged_tx.try_send(()) {
            Ok(()) => debug!(peers = peers.len(), "Peers converged"),
            Err(e) => trace!(error = %e, "Convergence already signaled"),
        }
    }

    /// Replace the directory with the one received from the master
    pub fn adopt_directory(&self, directory: PeerDirectory) {
        *self.peers.lock().expect("Locking failed") = directory;
    }

    /// Merge a newer peer list from the master
    pub fn refresh_peers(&self, update: &PeerDirectory) -> PeerDirectory {
        let mut peers = self.peers.lock().expect("Locking failed");
        if peers.refresh_from(update) {
            trace!(peers = peers.len(), "Peer list refreshed");
        } else {
            warn!(
                known = peers.len(),
                received = update.len(),
                "Ignoring inconsistent peer list from master"
            );
        }
        peers.clone()
    }

    /// Freeze the directory and switch to [`BootstrapState::Running`]
    pub fn enter_running(&self) -> PeerDirectory {
        let peers = self.peers.lock().expect("Locking failed");
        self.transition(BootstrapState::Running);
        peers.clone()
    }

    /// Enter [`BootstrapState::Running`] with a previously persisted directory
    pub fn resume(&self, directory: PeerDirectory) {
        let mut peers = self.peers.lock().expect("Locking failed");
        *peers = directory;
        self.transition(BootstrapState::Running);
    }

    /// Address slaves send everyone asking them to
    pub fn master_redirect_url(&self) -> Option<String> {
        let master = self.params.master_addr()?;
        let peers = self.peers.lock().expect("Locking failed");
        let host = peers
            .peers()
            .first()
            .map(|peer| peer.host.as_str())
            .unwrap_or(master.host.as_str());
        Some(format!(
            "http://{host}:{}{}",
            master.port,
            starterd_api::HELLO_PATH
        ))
    }

    /// Host a master registers itself under without being asked
    fn eager_self_host(&self) -> Option<&str> {
        match self.params.own_address.as_deref() {
            Some(host) => Some(host),
            None if self.params.agency_size <= 1 => Some(LOCALHOST),
            None => None,
        }
    }
}

/// Handle to control and inspect a running [`Node`]
#[derive(Clone)]
pub struct NodeCtrl {
    shared: Arc<NodeShared>,
    local_addr: SocketAddr,
}

impl NodeCtrl {
    /// Address the discovery endpoint listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> BootstrapState {
        self.shared.state()
    }

    pub fn directory(&self) -> PeerDirectory {
        self.shared.directory()
    }

    pub fn stop(&self) {
        self.shared.is_node_shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn install_signal_handler(&self) -> anyhow::Result<()> {
        debug!("Installing signal handler");
        for sig in TERM_SIGNALS {
            trace!(sig, "Installing signal handler");
            flag::register(*sig, Arc::clone(&self.shared.is_node_shutting_down))?;
        }
        Ok(())
    }
}

pub struct Node {
    shared: Arc<NodeShared>,
    /// Thread running bootstrap and then supervising started processes
    coordinator: Option<Coordinator>,
    /// Tokio executor answering discovery requests
    discovery: DiscoveryHandler,
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shared.is_node_shutting_down.store(true, Ordering::SeqCst);
    }
}

impl Node {
    pub fn new(params: Parameters) -> NodeResult<Self> {
        info!(
            listen = %params.listen,
            "work-dir" = %params.work_dir.display(),
            agency_size = params.agency_size,
            join = ?params.join,
            "Starting starterd"
        );
        if params.agency_size == 0 {
            return Err(NodeError::InvalidAgencySize);
        }

        let (converged_tx, converged_rx) = flume::bounded(1);
        let shared = Arc::new(NodeShared::new(params.clone(), converged_tx));

        let discovery = DiscoveryHandler::new(shared.clone(), params.listen)?;
        let coordinator = Coordinator::new(shared.clone(), converged_rx);

        Ok(Node {
            shared,
            coordinator: Some(coordinator),
            discovery,
        })
    }

    pub fn get_ctrl(&self) -> NodeCtrl {
        NodeCtrl {
            shared: Arc::clone(&self.shared),
            local_addr: self.discovery.local_addr(),
        }
    }

    /// Block until the node is done
    ///
    /// That is after the stop request was handled, or right away when
    /// joining the cluster failed.
    pub fn wait(mut self) -> NodeResult<BootstrapOutcome> {
        let res = self
            .coordinator
            .take()
            .expect("Coordinator already taken")
            .wait();
        drop(self);
        info!("Node finished");
        res
    }
}

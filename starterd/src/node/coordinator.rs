use std::sync::Arc;

use starter::Client;
use starterd_api::PeerDirectory;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{
    BootstrapOutcome, BootstrapState, MasterAddr, NodeError, NodeResult, NodeShared, Supervisor,
};
use crate::task::AutoJoinHandle;

/// Drives the bootstrap and then supervises the started processes
pub struct Coordinator {
    join_handle: AutoJoinHandle<NodeResult<BootstrapOutcome>>,
}

impl Coordinator {
    pub fn new(shared: Arc<NodeShared>, converged_rx: flume::Receiver<()>) -> Self {
        let join_handle =
            AutoJoinHandle::spawn("coordinator", move || -> NodeResult<BootstrapOutcome> {
                let _guard = scopeguard::guard((), |_| {
                    info!("Coordinator is done");
                });
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                let panic_guard = shared.panic_guard("coordinator");
                let res = rt.block_on(
                    CoordinatorInner {
                        shared,
                        converged_rx,
                    }
                    .run(),
                );
                panic_guard.done();
                res
            });

        Self { join_handle }
    }

    pub fn wait(self) -> NodeResult<BootstrapOutcome> {
        self.join_handle.join()
    }
}

struct CoordinatorInner {
    shared: Arc<NodeShared>,
    converged_rx: flume::Receiver<()>,
}

impl CoordinatorInner {
    async fn run(&self) -> NodeResult<BootstrapOutcome> {
        let (directory, resumed) = match self.shared.setup().load_for_resume() {
            // a restarted node must keep its identity, so no discovery at all
            Some(directory) => {
                info!("Relaunching service");
                self.shared.resume(directory.clone());
                (directory, true)
            }
            None => {
                let directory = match self.shared.params.master_addr() {
                    Some(master) => self.run_slave(master).await?,
                    None => self.run_master().await,
                };
                let Some(directory) = directory else {
                    info!("Stopped before enough peers showed up");
                    return Ok(BootstrapOutcome::Aborted);
                };
                (directory, false)
            }
        };

        let supervisor = Supervisor::launch(&self.shared.params, &directory);
        self.wait_for_stop().await;
        supervisor.shutdown(self.shared.params.shutdown_grace).await;

        Ok(BootstrapOutcome::Finished { resumed })
    }

    /// Wait for enough peers to register with us
    ///
    /// Returns `None` if stopped first.
    async fn run_master(&self) -> Option<PeerDirectory> {
        self.shared.transition(BootstrapState::Master);
        info!("Serving as master");

        if let Some(host) = self.shared.eager_self_host() {
            self.shared.init_self_if_empty(host);
        }

        loop {
            sleep(self.shared.params.poll_interval).await;
            if self.shared.is_node_shutting_down() {
                return None;
            }
            if self.converged_rx.try_recv().is_ok() {
                return Some(self.start_running());
            }
        }
    }

    /// Join the master, then poll it until enough peers joined
    ///
    /// Failing to join is fatal: without the master there is no cluster.
    /// Failed polls are only logged and retried on the next tick.
    async fn run_slave(&self, master: MasterAddr) -> NodeResult<Option<PeerDirectory>> {
        self.shared.transition(BootstrapState::Slave);
        info!(%master, "Contacting master");

        let client = Client::new(&master.to_string(), self.shared.params.request_timeout)
            .map_err(NodeError::Join)?;
        let directory = client
            .join(&self.shared.params.directory_name())
            .await
            .map_err(NodeError::Join)?
            .into_joined();
        info!(
            my_index = directory.my_index(),
            agency_size = directory.agency_size(),
            "Joined"
        );
        self.shared.adopt_directory(directory);

        info!("Waiting for enough servers to show up");
        loop {
            if self.shared.directory().is_converged() {
                return Ok(Some(self.start_running()));
            }
            sleep(self.shared.params.poll_interval).await;
            if self.shared.is_node_shutting_down() {
                return Ok(None);
            }
            match client.hello().await {
                Ok(update) => {
                    let peers = self.shared.refresh_peers(&update);
                    debug!(peers = peers.len(), "Polled master");
                }
                Err(e) => warn!(%master, error = %e, "Could not poll master"),
            }
        }
    }

    fn start_running(&self) -> PeerDirectory {
        let directory = self.shared.enter_running();
        if let Err(e) = self.shared.setup().persist(&directory) {
            warn!(error = %e, "Could not save setup");
        }
        info!(peers = directory.len(), "Starting running service");
        directory
    }

    async fn wait_for_stop(&self) {
        while !self.shared.is_node_shutting_down() {
            sleep(self.shared.params.poll_interval).await;
        }
    }
}

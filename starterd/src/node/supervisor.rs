use std::time::Duration;

use starterd_api::PeerDirectory;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{assign_roles, CommandResult, Parameters, Role, RoleCommand, RunningProcess};

/// Processes of all the roles this node runs
pub struct Supervisor {
    processes: Vec<(Role, Box<dyn RunningProcess>)>,
}

impl Supervisor {
    /// Start every role assigned to this node
    ///
    /// A role that fails to start is logged and skipped; the others
    /// still run.
    pub fn launch(params: &Parameters, directory: &PeerDirectory) -> Self {
        let roles = assign_roles(directory.my_index(), directory.agency_size(), params.roles);
        info!(?roles, my_index = directory.my_index(), "Starting services");

        let mut processes = vec![];
        for role in roles {
            match Self::launch_role(params, directory, role) {
                Ok(process) => {
                    info!(%role, pid = process.id(), "Started");
                    processes.push((role, process));
                }
                Err(e) => error!(%role, error = %e, "Error whilst starting"),
            }
        }
        Self { processes }
    }

    fn launch_role(
        params: &Parameters,
        directory: &PeerDirectory,
        role: Role,
    ) -> CommandResult<Box<dyn RunningProcess>> {
        let command = RoleCommand::build(params, directory, role)?;
        command.prepare(&params.log_level)?;
        Ok(params.launcher.launch(&command)?)
    }

    /// Stop all processes
    ///
    /// Coordinator and DBServer go first. The agent holds the state they
    /// depend on, so it is stopped only after `grace` passed.
    pub async fn shutdown(self, grace: Duration) {
        info!("Shutting down services");
        let (mut agents, mut dependents): (Vec<_>, Vec<_>) = self
            .processes
            .into_iter()
            .partition(|(role, _)| *role == Role::Agent);

        dependents.sort_by_key(|(role, _)| *role != Role::Coordinator);
        for (role, mut process) in dependents {
            terminate(role, process.as_mut());
        }

        if agents.is_empty() {
            return;
        }
        sleep(grace).await;
        for (role, process) in &mut agents {
            terminate(*role, process.as_mut());
        }
    }
}

fn terminate(role: Role, process: &mut dyn RunningProcess) {
    match process.terminate() {
        Ok(()) => info!(%role, pid = process.id(), "Stopped"),
        Err(e) => warn!(%role, pid = process.id(), error = %e, "Could not stop"),
    }
}

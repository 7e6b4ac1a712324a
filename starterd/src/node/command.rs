use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use derive_more::Display;
use starterd_api::{Peer, PeerDirectory, PortOffset};
use thiserror::Error;
use tracing::debug;

use super::Parameters;

/// Database process roles a launcher can run
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum Role {
    #[display(fmt = "agent")]
    Agent,
    #[display(fmt = "dbserver")]
    DbServer,
    #[display(fmt = "coordinator")]
    Coordinator,
}

impl Role {
    /// Port of the role at port offset 0
    ///
    /// Ranges of different roles never overlap, so all roles can run on
    /// one host with the same port offset.
    pub fn base_port(self) -> u16 {
        match self {
            Role::Agent => 4001,
            Role::Coordinator => 8530,
            Role::DbServer => 8629,
        }
    }

    pub fn port(self, offset: PortOffset) -> Option<u16> {
        self.base_port().checked_add(offset.0)
    }

    /// Server threads and V8 contexts written to the configuration file
    fn tuning(self) -> (u32, u32) {
        match self {
            Role::Agent => (8, 1),
            Role::DbServer => (4, 4),
            Role::Coordinator => (16, 4),
        }
    }
}

/// Which non-agent roles to run locally
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RoleFlags {
    pub dbserver: bool,
    pub coordinator: bool,
}

impl Default for RoleFlags {
    fn default() -> Self {
        Self {
            dbserver: true,
            coordinator: true,
        }
    }
}

/// Roles a node at `my_index` runs, in start order
///
/// The first `agency_size` peers are agents, the other roles depend
/// only on local configuration.
pub fn assign_roles(my_index: usize, agency_size: usize, flags: RoleFlags) -> Vec<Role> {
    let mut roles = vec![];
    if my_index < agency_size {
        roles.push(Role::Agent);
    }
    if flags.dbserver {
        roles.push(Role::DbServer);
    }
    if flags.coordinator {
        roles.push(Role::Coordinator);
    }
    roles
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("own entry missing from the peer directory")]
    NotRegistered,
    #[error("port of {role} out of range with offset {offset}")]
    PortOutOfRange { role: Role, offset: PortOffset },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Everything needed to start the process of one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCommand {
    pub role: Role,
    pub port: u16,
    /// `<work-dir>/<role><port>/`
    pub dir: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Where stdout and stderr of the process go
    pub output_path: PathBuf,
}

impl RoleCommand {
    pub const CONF_FILE_NAME: &'static str = "arangod.conf";
    pub const COMMAND_FILE_NAME: &'static str = "arangod_command.txt";
    pub const OUTPUT_FILE_NAME: &'static str = "arangod.stdout.log";

    /// Build the command of `role` from the converged `directory`
    ///
    /// The agency endpoints are taken from `directory` as it is now and
    /// never updated afterwards.
    pub fn build(
        params: &Parameters,
        directory: &PeerDirectory,
        role: Role,
    ) -> CommandResult<Self> {
        let me = directory.me().ok_or(CommandError::NotRegistered)?;
        let port = role
            .port(me.port_offset)
            .ok_or(CommandError::PortOutOfRange {
                role,
                offset: me.port_offset,
            })?;
        let dir = params.work_dir.join(format!("{role}{port}"));
        let address = format!("{}:{port}", me.host);

        let mut args = vec![];
        let program = match &params.rr_path {
            Some(rr) => {
                args.push(path_arg(&params.arangod));
                rr.clone()
            }
            None => params.arangod.clone(),
        };

        push_opt(&mut args, "-c", path_arg(&dir.join(Self::CONF_FILE_NAME)));
        push_opt(&mut args, "--database.directory", path_arg(&dir.join("data")));
        push_opt(
            &mut args,
            "--javascript.startup-directory",
            path_arg(&params.js_dir),
        );
        push_opt(&mut args, "--javascript.app-path", path_arg(&dir.join("apps")));
        push_opt(&mut args, "--log.file", path_arg(&dir.join("arangod.log")));
        push_opt(&mut args, "--log.force-direct", "false");
        push_opt(&mut args, "--server.authentication", "false");

        match role {
            Role::Agent => {
                push_opt(&mut args, "--agency.activate", "true");
                push_opt(&mut args, "--agency.my-address", format!("tcp://{address}"));
                push_opt(&mut args, "--agency.size", directory.agency_size());
                push_opt(&mut args, "--agency.supervision", "true");
                push_opt(&mut args, "--foxx.queues", "false");
                push_opt(&mut args, "--server.statistics", "false");
                for (i, peer) in directory.agency().iter().enumerate() {
                    if i != directory.my_index() {
                        push_opt(&mut args, "--agency.endpoint", agency_endpoint(peer)?);
                    }
                }
            }
            Role::DbServer | Role::Coordinator => {
                let (cluster_role, foxx_queues) = if role == Role::DbServer {
                    ("PRIMARY", "false")
                } else {
                    ("COORDINATOR", "true")
                };
                push_opt(&mut args, "--cluster.my-address", format!("tcp://{address}"));
                push_opt(&mut args, "--cluster.my-role", cluster_role);
                push_opt(&mut args, "--cluster.my-local-info", &address);
                push_opt(&mut args, "--foxx.queues", foxx_queues);
                push_opt(&mut args, "--server.statistics", "true");
                for peer in directory.agency() {
                    push_opt(&mut args, "--cluster.agency-endpoint", agency_endpoint(peer)?);
                }
            }
        }

        Ok(Self {
            role,
            port,
            output_path: dir.join(Self::OUTPUT_FILE_NAME),
            dir,
            program,
            args,
        })
    }

    /// Create the role directory with its configuration and command files
    ///
    /// Files already present from a previous run are left alone.
    pub fn prepare(&self, log_level: &str) -> io::Result<()> {
        fs::create_dir_all(self.dir.join("data"))?;
        fs::create_dir_all(self.dir.join("apps"))?;

        let (threads, v8_contexts) = self.role.tuning();
        write_new_file(
            &self.dir.join(Self::CONF_FILE_NAME),
            &format!(
                "# ArangoDB configuration file
#
# Documentation:
# https://docs.arangodb.com/Manual/Administration/Configuration/
#

[server]
endpoint = tcp://0.0.0.0:{port}
threads = {threads}

[log]
level = {log_level}

[javascript]
v8-contexts = {v8_contexts}
",
                port = self.port
            ),
        )?;

        let mut command_line = path_arg(&self.program);
        for arg in &self.args {
            command_line.push(' ');
            command_line.push_str(arg);
        }
        command_line.push('\n');
        write_new_file(&self.dir.join(Self::COMMAND_FILE_NAME), &command_line)
    }
}

fn agency_endpoint(peer: &Peer) -> CommandResult<String> {
    let endpoint = peer
        .endpoint(Role::Agent.base_port())
        .ok_or(CommandError::PortOutOfRange {
            role: Role::Agent,
            offset: peer.port_offset,
        })?;
    Ok(format!("tcp://{endpoint}"))
}

fn push_opt(args: &mut Vec<String>, name: &str, value: impl fmt::Display) {
    args.push(name.to_owned());
    args.push(value.to_string());
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn write_new_file(path: &Path, content: &str) -> io::Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => file.write_all(content.as_bytes()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "Keeping existing file");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DirectorySnapshot;

/// Offset added to every role's base port
///
/// Distinguishes launchers running on the same host. The first launcher
/// on a host gets `0`, the next one `1`, and so on.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PortOffset(pub u16);

impl PortOffset {
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// One launcher instance taking part in the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// Host as observed by the master, never self-reported
    pub host: String,
    pub port_offset: PortOffset,
    /// Working directory of the launcher on its host
    pub directory: String,
}

impl Peer {
    /// `host:port` of this peer for a role listening on `base_port`
    ///
    /// `None` if the offset pushes the port past `u16::MAX`.
    pub fn endpoint(&self, base_port: u16) -> Option<String> {
        let port = base_port.checked_add(self.port_offset.0)?;
        Some(format!("{}:{port}", self.host))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Cannot use same directory as peer.")]
    DuplicateDirectory,
    #[error("snapshot columns differ in length: {hosts} hosts, {port_offsets} port offsets, {directories} directories")]
    ColumnMismatch {
        hosts: usize,
        port_offsets: usize,
        directories: usize,
    },
    #[error("own index {my_index} out of range of {len} peers")]
    IndexOutOfRange { my_index: usize, len: usize },
    #[error("agency size must be at least 1")]
    ZeroAgencySize,
}

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Ordered list of peers agreed on during bootstrap
///
/// Position in the list is permanent identity: peers are only ever
/// appended, and the first `agency_size` of them form the agency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "DirectorySnapshot", try_from = "DirectorySnapshot")]
pub struct PeerDirectory {
    peers: Vec<Peer>,
    agency_size: usize,
    my_index: usize,
}

impl PeerDirectory {
    pub fn new(agency_size: usize) -> Self {
        Self {
            peers: vec![],
            agency_size,
            my_index: 0,
        }
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn agency_size(&self) -> usize {
        self.agency_size
    }

    pub fn my_index(&self) -> usize {
        self.my_index
    }

    /// Our own entry, once it was appended
    pub fn me(&self) -> Option<&Peer> {
        self.peers.get(self.my_index)
    }

    /// Peers forming the agency
    pub fn agency(&self) -> &[Peer] {
        &self.peers[..self.agency_size.min(self.peers.len())]
    }

    /// Enough peers registered to start the cluster
    pub fn is_converged(&self) -> bool {
        !self.peers.is_empty() && self.agency_size <= self.peers.len()
    }

    /// Port offset a new peer on `host` would get
    ///
    /// Returns the offset and whether `host` is not known yet. The most
    /// recently registered peer on the same host decides the offset.
    pub fn register_or_find_offset(
        &self,
        host: &str,
        directory: &str,
    ) -> DirectoryResult<(PortOffset, bool)> {
        if self
            .peers
            .iter()
            .any(|peer| peer.host == host && peer.directory == directory)
        {
            return Err(DirectoryError::DuplicateDirectory);
        }

        Ok(
            match self.peers.iter().rev().find(|peer| peer.host == host) {
                Some(peer) => (peer.port_offset.next(), false),
                None => (PortOffset::default(), true),
            },
        )
    }

    /// Append a new peer and return its position
    pub fn register(&mut self, host: &str, directory: &str) -> DirectoryResult<usize> {
        let (port_offset, _) = self.register_or_find_offset(host, directory)?;
        self.peers.push(Peer {
            host: host.to_owned(),
            port_offset,
            directory: directory.to_owned(),
        });
        Ok(self.peers.len() - 1)
    }

    /// Register ourselves as the very first peer
    ///
    /// Does nothing if any peer is already known.
    pub fn init_self(&mut self, host: &str, directory: &str) -> bool {
        if !self.peers.is_empty() {
            return false;
        }
        self.peers.push(Peer {
            host: host.to_owned(),
            port_offset: PortOffset::default(),
            directory: directory.to_owned(),
        });
        self.my_index = 0;
        true
    }

    /// Take a directory received from the master after joining it
    ///
    /// The joining peer was appended last, so that's our position.
    pub fn into_joined(mut self) -> Self {
        self.my_index = self.peers.len().saturating_sub(1);
        self
    }

    /// Take newer peer list from the master, keeping our own identity
    ///
    /// The list can only grow: an update that is shorter or that disagrees
    /// with already known peers is rejected.
    pub fn refresh_from(&mut self, update: &PeerDirectory) -> bool {
        if update.peers.len() < self.peers.len()
            || !self
                .peers
                .iter()
                .zip(update.peers.iter())
                .all(|(known, new)| known.host == new.host && known.port_offset == new.port_offset)
        {
            return false;
        }
        self.peers = update.peers.clone();
        true
    }
}

impl From<PeerDirectory> for DirectorySnapshot {
    fn from(directory: PeerDirectory) -> Self {
        let mut snapshot = DirectorySnapshot {
            my_index: directory.my_index,
            agency_size: directory.agency_size,
            ..Default::default()
        };
        for peer in directory.peers {
            snapshot.hosts.push(peer.host);
            snapshot.port_offsets.push(peer.port_offset);
            snapshot.directories.push(peer.directory);
        }
        snapshot
    }
}

impl TryFrom<DirectorySnapshot> for PeerDirectory {
    type Error = DirectoryError;

    fn try_from(snapshot: DirectorySnapshot) -> DirectoryResult<Self> {
        let DirectorySnapshot {
            hosts,
            port_offsets,
            directories,
            my_index,
            agency_size,
        } = snapshot;

        if hosts.len() != port_offsets.len() || hosts.len() != directories.len() {
            return Err(DirectoryError::ColumnMismatch {
                hosts: hosts.len(),
                port_offsets: port_offsets.len(),
                directories: directories.len(),
            });
        }
        if agency_size == 0 {
            return Err(DirectoryError::ZeroAgencySize);
        }
        if !hosts.is_empty() && hosts.len() <= my_index {
            return Err(DirectoryError::IndexOutOfRange {
                my_index,
                len: hosts.len(),
            });
        }

        Ok(Self {
            peers: hosts
                .into_iter()
                .zip(port_offsets)
                .zip(directories)
                .map(|((host, port_offset), directory)| Peer {
                    host,
                    port_offset,
                    directory,
                })
                .collect(),
            agency_size,
            my_index,
        })
    }
}

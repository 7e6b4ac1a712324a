use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Host, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use starterd_api::{
    host_from_authority, host_from_socket_addr, normalize_host, ErrorBody, JoinRequest,
    HELLO_PATH, LOCALHOST,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{BootstrapState, NodeShared, RegisterError};
use crate::task::AutoJoinHandle;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid join request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Missing directory in join request.")]
    MissingDirectory,
    #[error("{0}")]
    Register(#[from] RegisterError),
}

impl IntoResponse for DiscoveryError {
    fn into_response(self) -> Response {
        let status = match &self {
            DiscoveryError::Malformed(_)
            | DiscoveryError::MissingDirectory
            | DiscoveryError::Register(RegisterError::Directory(_)) => StatusCode::BAD_REQUEST,
            DiscoveryError::Register(RegisterError::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
            DiscoveryError::Register(RegisterError::MembershipFixed)
            | DiscoveryError::Register(RegisterError::NotMaster) => StatusCode::CONFLICT,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

/// Serves the join protocol on `/hello`
///
/// Runs until the node is shutting down, also after the bootstrap is
/// complete, so late pollers still get the final peer list.
pub struct DiscoveryHandler {
    local_addr: SocketAddr,
    #[allow(unused)]
    join_handle: AutoJoinHandle,
}

impl DiscoveryHandler {
    const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

    pub fn new(shared: Arc<NodeShared>, listen_addr: SocketAddr) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(listen_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Listening for peers");

        let join_handle = AutoJoinHandle::spawn_res("discovery", move || -> io::Result<()> {
            let _guard = scopeguard::guard((), |_| {
                info!("DiscoveryHandler is done");
            });
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                axum::serve(
                    listener,
                    router(shared.clone()).into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(wait_for_shutdown(shared))
                .await
            })?;

            debug!("Waiting for DiscoveryHandler to complete all connections...");
            rt.shutdown_timeout(Duration::from_secs(5));
            Ok(())
        });

        Ok(Self {
            local_addr,
            join_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn wait_for_shutdown(shared: Arc<NodeShared>) {
    while !shared.is_node_shutting_down() {
        sleep(DiscoveryHandler::SHUTDOWN_POLL).await;
    }
}

fn router(shared: Arc<NodeShared>) -> Router {
    Router::new()
        .route(HELLO_PATH, get(hello_info).post(hello_join))
        .with_state(shared)
}

/// Slaves never answer themselves; everyone is sent to the master
fn redirect_if_slave(shared: &NodeShared) -> Option<Response> {
    if shared.state() != BootstrapState::Slave {
        return None;
    }
    let url = shared.master_redirect_url()?;
    debug!(%url, "Redirecting to master");
    Some(Redirect::temporary(&url).into_response())
}

/// Host we were reached at, which is how others see us
///
/// Without any `Host` information we fall back to the configured own
/// address, or to `localhost`.
fn own_host(shared: &NodeShared, host: Option<Host>) -> String {
    match host {
        Some(Host(authority)) => host_from_authority(&authority),
        None => shared
            .params
            .own_address
            .as_deref()
            .map(normalize_host)
            .unwrap_or_else(|| LOCALHOST.to_owned()),
    }
}

/// `GET /hello`: current peer directory
async fn hello_info(State(shared): State<Arc<NodeShared>>, host: Option<Host>) -> Response {
    if let Some(redirect) = redirect_if_slave(&shared) {
        return redirect;
    }
    shared.init_self_if_empty(&own_host(&shared, host));
    Json(shared.directory()).into_response()
}

/// `POST /hello`: register a new peer
async fn hello_join(
    State(shared): State<Arc<NodeShared>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    host: Option<Host>,
    body: Bytes,
) -> DiscoveryResult<Response> {
    if let Some(redirect) = redirect_if_slave(&shared) {
        return Ok(redirect);
    }

    let request: JoinRequest = serde_json::from_slice(&body)?;
    let directory = request
        .directory()
        .ok_or(DiscoveryError::MissingDirectory)?;

    if shared.state() == BootstrapState::Master {
        shared.init_self_if_empty(&own_host(&shared, host));
    }

    let host = host_from_socket_addr(&remote_addr);
    match shared.register_peer(&host, directory) {
        Ok(peers) => Ok(Json(peers).into_response()),
        Err(e) => {
            warn!(%host, directory, error = %e, "Join request rejected");
            Err(e.into())
        }
    }
}

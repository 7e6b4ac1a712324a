#![deny(clippy::as_conversions)]
use opts::Opts;
use starterd::{BootstrapOutcome, Parameters, RoleFlags};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod opts;

fn main() -> anyhow::Result<()> {
    init_logging();

    let opts = Opts::from_args();

    let work_dir = std::env::current_dir()?.join(&opts.work_dir);
    std::fs::create_dir_all(&work_dir)?;
    let work_dir = work_dir.canonicalize()?;

    let installation = starterd::executable::find_installation();

    let params = Parameters::builder()
        .work_dir(work_dir)
        .listen(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            opts.port,
        ))
        .agency_size(opts.agency_size)
        .roles(RoleFlags {
            dbserver: opts.dbserver,
            coordinator: opts.coordinator,
        })
        .arangod(opts.arangod.unwrap_or(installation.arangod))
        .js_dir(opts.js_dir.unwrap_or(installation.js_dir))
        .rr_path(opts.rr)
        .log_level(opts.log_level)
        .join(opts.join)
        .own_address(opts.own_address)
        .build();

    let node = starterd::Node::new(params)?;

    node.get_ctrl().install_signal_handler()?;

    match node.wait()? {
        BootstrapOutcome::Aborted => info!("Stopped before the cluster was set up"),
        BootstrapOutcome::Finished { resumed } => info!(resumed, "Cluster stopped"),
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(atty::is(atty::Stream::Stderr))
                .with_writer(io::stderr),
        )
        .init();
}

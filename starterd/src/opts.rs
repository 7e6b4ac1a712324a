use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug, Clone)]
#[clap(about = "Bootstraps and supervises a database cluster")]
pub struct Opts {
    /// Number of agents in the cluster
    #[clap(
        long = "agency-size",
        env = "STARTERD_AGENCY_SIZE",
        default_value = "3",
        value_parser = parse_agency_size
    )]
    pub agency_size: usize,

    /// Port the launcher listens on for peers
    #[clap(long = "port", env = "STARTERD_PORT", default_value_t = starterd_api::DEFAULT_LAUNCHER_PORT)]
    pub port: u16,

    #[clap(long = "work-dir", env = "STARTERD_WORK_DIR", default_value = "./")]
    pub work_dir: PathBuf,

    /// Database executable; looked up if not given
    #[clap(long = "arangod", env = "STARTERD_ARANGOD")]
    pub arangod: Option<PathBuf>,

    /// JS support directory of the database; looked up if not given
    #[clap(long = "jsdir", env = "STARTERD_JSDIR")]
    pub js_dir: Option<PathBuf>,

    #[clap(long = "coordinator", default_value_t = true, action = ArgAction::Set)]
    pub coordinator: bool,

    #[clap(long = "dbserver", default_value_t = true, action = ArgAction::Set)]
    pub dbserver: bool,

    /// Run the database under this recorder
    #[clap(long = "rr")]
    pub rr: Option<PathBuf>,

    /// Log level of the started database processes
    #[clap(long = "log-level", default_value = "INFO")]
    pub log_level: String,

    /// Address to register under as master before any peer contacted us
    #[clap(long = "own-address", env = "STARTERD_OWN_ADDRESS")]
    pub own_address: Option<String>,

    /// `host[:port]` of the master to join
    #[clap(value_name = "JOIN")]
    pub join: Option<String>,
}

impl Opts {
    pub fn from_args() -> Self {
        Opts::parse()
    }
}

fn parse_agency_size(s: &str) -> std::result::Result<usize, String> {
    let size = usize::from_str(s.trim()).map_err(|e| e.to_string())?;
    if size == 0 {
        return Err("must be at least 1".into());
    }
    Ok(size)
}

#[test]
fn parse_agency_size_test() {
    assert_eq!(parse_agency_size("1"), Ok(1));
    assert_eq!(parse_agency_size("3"), Ok(3));
    assert_eq!(parse_agency_size(" 5 "), Ok(5));
    assert!(parse_agency_size("0").is_err());
    assert!(parse_agency_size("-1").is_err());
    assert!(parse_agency_size("three").is_err());
}

#[test]
fn defaults_and_join_target() {
    let opts = Opts::parse_from(["starterd", "--coordinator", "false", "10.0.0.1:4000"]);
    assert_eq!(opts.agency_size, 3);
    assert_eq!(opts.port, 4000);
    assert!(!opts.coordinator);
    assert!(opts.dbserver);
    assert_eq!(opts.log_level, "INFO");
    assert_eq!(opts.join.as_deref(), Some("10.0.0.1:4000"));
}

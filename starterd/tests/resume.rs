use anyhow::Result;
use common::{closed_addr, TestStarterd};
use starterd::setup::SetupStore;
use starterd::{BootstrapOutcome, BootstrapState, RoleCommand};
use starterd_api::PeerDirectory;

mod common;

fn store_single_node_setup(work_dir: &tempfile::TempDir) -> Result<PeerDirectory> {
    let mut directory = PeerDirectory::new(1);
    directory.init_self("localhost", &work_dir.path().to_string_lossy());
    SetupStore::new(work_dir.path()).persist(&directory)?;
    Ok(directory)
}

#[tokio::test(flavor = "multi_thread")]
async fn stored_setup_skips_discovery() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let stored = store_single_node_setup(&work_dir)?;

    // the join target is never contacted
    let mut node = TestStarterd::in_dir(work_dir, 3, Some(closed_addr()?))?;
    node.wait_for_state(BootstrapState::Running).await?;
    assert_eq!(node.ctrl().directory(), stored);

    assert_eq!(
        node.finish().await?,
        BootstrapOutcome::Finished { resumed: true }
    );
    assert_eq!(node.launcher().launched().len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_keeps_identity() -> Result<()> {
    let mut node = TestStarterd::master(1)?;
    node.wait_for_state(BootstrapState::Running).await?;
    let first_directory = node.ctrl().directory();
    assert_eq!(
        node.finish().await?,
        BootstrapOutcome::Finished { resumed: false }
    );
    let first: Vec<RoleCommand> = node.launcher().launched();

    node.restart()?;
    node.wait_for_state(BootstrapState::Running).await?;
    assert_eq!(node.ctrl().directory(), first_directory);
    assert_eq!(
        node.finish().await?,
        BootstrapOutcome::Finished { resumed: true }
    );

    let all = node.launcher().launched();
    assert_eq!(all.len(), 2 * first.len());
    assert_eq!(all[first.len()..], first[..]);

    // configuration written on first start is left alone
    for command in &first {
        assert!(command.dir.join(RoleCommand::CONF_FILE_NAME).exists());
        assert!(command.dir.join(RoleCommand::COMMAND_FILE_NAME).exists());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unfinished_setup_is_ignored() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    let mut partial = PeerDirectory::new(3);
    partial.init_self("localhost", &work_dir.path().to_string_lossy());
    SetupStore::new(work_dir.path()).persist(&partial)?;

    let mut node = TestStarterd::in_dir(work_dir, 3, None)?;
    node.wait_for_state(BootstrapState::Master).await?;
    assert_eq!(node.finish().await?, BootstrapOutcome::Aborted);
    assert!(node.launcher().launched().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_setup_is_ignored() -> Result<()> {
    let work_dir = tempfile::tempdir()?;
    std::fs::write(work_dir.path().join(SetupStore::FILE_NAME), b"{ not json")?;

    let mut node = TestStarterd::in_dir(work_dir, 1, None)?;
    node.wait_for_state(BootstrapState::Running).await?;
    assert_eq!(
        node.finish().await?,
        BootstrapOutcome::Finished { resumed: false }
    );

    // replaced by the fresh bootstrap
    let stored = SetupStore::new(node.work_dir()).load()?.expect("setup saved");
    assert_eq!(stored, node.ctrl().directory());
    Ok(())
}

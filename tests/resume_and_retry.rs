//! End-to-end runs: layout file to finished protocol, with failures, retries and resumes.

use labdeck::config::AllocationConfig;
use labdeck::driver::MockDriver;
use labdeck::layout::Layout;
use labdeck::operator::ScriptedOperator;
use labdeck::protocol::plate_replicate::PLATES_DONE;
use labdeck::protocol::{ProtocolRegistry, ProtocolRun};
use labdeck::retry::{run_with_retry, RetryPolicy};
use labdeck::run::Run;
use labdeck::state::StateStore;
use labdeck::DeckError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const LAYOUT: &str = r#"
[[labware]]
slot = "A1"
kind = "plate"
format = 96
name = "source"
depth = 3

[[labware]]
slot = "B1"
kind = "plate"
format = 96
name = "target"
depth = 3

[[labware]]
slot = "C1"
kind = "tips"
format = 96
name = "tips"
depth = 3
"#;

fn new_run(root: &Path) -> Run {
    let deck = Layout::from_toml(LAYOUT)
        .unwrap()
        .build(&AllocationConfig::default())
        .unwrap();
    Run::create_with_deck(root, &deck).unwrap()
}

fn job(root: &Path, run: &Run, driver: Arc<MockDriver>, operator: Arc<ScriptedOperator>) -> ProtocolRun {
    let protocol = ProtocolRegistry::new().create("plate-replicate").unwrap();
    ProtocolRun::new(
        protocol,
        run,
        root.to_path_buf(),
        driver,
        operator,
        Duration::from_secs(1),
    )
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_retry_resumes_after_device_failure() {
    let root = tempfile::tempdir().unwrap();
    let run = new_run(root.path());
    let driver = Arc::new(MockDriver::new());
    let operator = Arc::new(ScriptedOperator::default());
    driver.fail_next("dispense", 1).await;

    let mut job = job(root.path(), &run, driver.clone(), operator.clone());
    run_with_retry(&mut job, &policy(), operator.as_ref()).await.unwrap();

    let actions = driver.actions().await;
    assert_eq!(actions.iter().filter(|a| *a == "home").count(), 1);
    // one retried dispense on top of one per plate
    assert_eq!(actions.iter().filter(|a| *a == "dispense").count(), 4);
    assert_eq!(actions.iter().filter(|a| *a == "pick_up_tips").count(), 3);

    let titles = operator.titles();
    assert_eq!(titles.first().map(String::as_str), Some("Start failed"));
    assert_eq!(titles.last().map(String::as_str), Some("Method finished"));

    let store = StateStore::load(&run.state_path("plate-replicate")).unwrap();
    assert_eq!(store.get(PLATES_DONE), 3);
}

#[tokio::test]
async fn test_finished_run_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let run = new_run(root.path());
    let driver = Arc::new(MockDriver::new());
    let operator = Arc::new(ScriptedOperator::default());

    let mut first = job(root.path(), &run, driver.clone(), operator.clone());
    run_with_retry(&mut first, &policy(), operator.as_ref()).await.unwrap();
    let sent = driver.commands().await.len();

    let reopened = Run::open(root.path(), run.id()).unwrap();
    let mut again = job(root.path(), &reopened, driver.clone(), operator.clone());
    run_with_retry(&mut again, &policy(), operator.as_ref()).await.unwrap();
    assert_eq!(driver.commands().await.len(), sent);
}

#[tokio::test]
async fn test_exhausted_retries_leave_progress_on_disk() {
    let root = tempfile::tempdir().unwrap();
    let run = new_run(root.path());
    let driver = Arc::new(MockDriver::new());
    let operator = Arc::new(ScriptedOperator::default());
    driver.fail_next("drop_tips", 3).await;

    let mut job = job(root.path(), &run, driver.clone(), operator.clone());
    let result = run_with_retry(&mut job, &policy(), operator.as_ref()).await;
    assert!(matches!(result, Err(DeckError::DeviceCommand { .. })));
    assert_eq!(operator.titles(), vec!["Start failed", "Retrying", "Method failed"]);

    let store = StateStore::load(&run.state_path("plate-replicate")).unwrap();
    assert!(store.is_done("transfer"));
    assert!(!store.is_done("drop_tips"));
    assert_eq!(store.get(PLATES_DONE), 0);
}

#[tokio::test]
async fn test_corrupt_state_is_not_retried() {
    let root = tempfile::tempdir().unwrap();
    let run = new_run(root.path());
    let state_path = run.state_path("plate-replicate");
    std::fs::write(&state_path, "{ broken").unwrap();

    let driver = Arc::new(MockDriver::new());
    let operator = Arc::new(ScriptedOperator::default());
    let mut job = job(root.path(), &run, driver.clone(), operator.clone());
    let result = run_with_retry(&mut job, &policy(), operator.as_ref()).await;

    assert!(matches!(result, Err(DeckError::StateCorrupt { .. })));
    assert_eq!(operator.titles(), vec!["Method stopped"]);
    assert!(driver.commands().await.is_empty());
    assert_eq!(std::fs::read_to_string(&state_path).unwrap(), "{ broken");
}

#[tokio::test]
async fn test_device_timeout_surfaces() {
    let root = tempfile::tempdir().unwrap();
    let run = new_run(root.path());
    let driver = Arc::new(MockDriver::with_latency(Duration::from_millis(200)));
    let operator = Arc::new(ScriptedOperator::default());
    let protocol = ProtocolRegistry::new().create("plate-replicate").unwrap();
    let mut job = ProtocolRun::new(
        protocol,
        &run,
        root.path().to_path_buf(),
        driver,
        operator.clone(),
        Duration::from_millis(10),
    );
    let policy = RetryPolicy {
        max_attempts: 1,
        backoff_delay: Duration::ZERO,
    };
    let result = run_with_retry(&mut job, &policy, operator.as_ref()).await;
    assert!(matches!(result, Err(DeckError::DeviceTimeout { .. })));
    assert_eq!(result.unwrap_err().exit_code(), 5);
}

#[tokio::test]
async fn test_operator_confirmed_depth_limits_the_run() {
    let root = tempfile::tempdir().unwrap();
    let mut deck = Layout::from_toml(LAYOUT)
        .unwrap()
        .build(&AllocationConfig::default())
        .unwrap();
    let setup = ScriptedOperator::new(["2", "2", "", "y"]);
    assert_eq!(deck.confirm_loaded(&setup).unwrap(), 2);
    let run = Run::create_with_deck(root.path(), &deck).unwrap();

    let driver = Arc::new(MockDriver::new());
    let operator = Arc::new(ScriptedOperator::default());
    let mut job = job(root.path(), &run, driver.clone(), operator.clone());
    run_with_retry(&mut job, &policy(), operator.as_ref()).await.unwrap();

    let commands = driver.commands().await;
    let sources: Vec<&str> = commands
        .iter()
        .filter(|c| c.action == "aspirate")
        .filter_map(|c| c.labware.as_ref().map(|l| l.as_str()))
        .collect();
    assert_eq!(sources, vec!["source_2", "source_1"]);
    let store = StateStore::load(&run.state_path("plate-replicate")).unwrap();
    assert_eq!(store.get(PLATES_DONE), 2);
}

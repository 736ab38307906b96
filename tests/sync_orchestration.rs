//! End-to-end orchestration tests: register, compile, arm, read, cancel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use daq_sync::instrument::mock::{AcquireCommand, DacRampCommand, MockDac, MockDigitizer};
use daq_sync::instrument::SyncInstrument;
use daq_sync::parameter::{DacVoltage, DigitizerChannel, SyncParameter};
use daq_sync::points::InstrumentHandle;
use daq_sync::{BoxedCommand, SyncError, SyncPoints};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Instrument with scripted prepare/cancel outcomes, for failure-path tests.
struct ScriptedInstrument {
    id: String,
    fail_prepare: bool,
    cancel_ok: bool,
    prepare_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl ScriptedInstrument {
    fn new(id: &str, fail_prepare: bool, cancel_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            fail_prepare,
            cancel_ok,
            prepare_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SyncInstrument for ScriptedInstrument {
    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(&self, _sync: &SyncPoints, _command: BoxedCommand) -> Result<()> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare {
            bail!("simulated arm failure");
        }
        Ok(())
    }

    async fn cancel_sync_operations(&self) -> bool {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_ok
    }
}

#[tokio::test]
async fn test_set_then_get_round_trip() {
    init_logging();
    let dac = Arc::new(MockDac::new("dac"));
    let digitizer = Arc::new(MockDigitizer::new("lockin"));

    let gate = DacVoltage::new(Arc::clone(&dac), 0, 0.1);
    let readout = DigitizerChannel::new(Arc::clone(&digitizer), 7);

    let ramp = [0.0, 0.25, 0.5, 0.75];
    let mut sync = gate.sync_set(&ramp, None).await.unwrap();
    let mut getter = readout.sync_get(&mut sync).await.unwrap();

    // Nothing armed until execution.
    assert!(!gate.is_running());
    assert!(matches!(getter.take(), Err(SyncError::StaleGetter(_))));

    sync.execute().await.unwrap();

    assert!(gate.is_running());
    assert_eq!(dac.armed_values(0).unwrap(), ramp);

    let data = getter.take().unwrap();
    assert_eq!(data, vec![7000.0, 7001.0, 7002.0, 7003.0]);
    assert!(!readout.is_running());

    // The capture is consumed; a second take must not return stale data.
    assert!(matches!(getter.take(), Err(SyncError::StaleGetter(_))));
}

#[tokio::test]
async fn test_two_ramps_one_dac_merge_in_parallel() {
    init_logging();
    let dac = Arc::new(MockDac::new("dac"));
    let ch0 = DacVoltage::new(Arc::clone(&dac), 0, 0.1);
    let ch1 = DacVoltage::new(Arc::clone(&dac), 1, 0.1);

    let sync = ch0.sync_set(&[0.0, 1.0], None).await.unwrap();
    let sync = ch1.sync_set(&[2.0, 3.0], Some(sync)).await.unwrap();
    sync.execute().await.unwrap();

    // One prepare carried both channel programs, merged, not overwritten.
    assert_eq!(dac.armed_values(0).unwrap(), [0.0, 1.0]);
    assert_eq!(dac.armed_values(1).unwrap(), [2.0, 3.0]);
}

#[tokio::test]
async fn test_repeated_sync_tiles_the_armed_ramp() {
    init_logging();
    let dac = Arc::new(MockDac::new("dac"));
    let ch0 = DacVoltage::new(Arc::clone(&dac), 0, 0.1);

    let inner = ch0.sync_set(&[0.0, 1.0], None).await.unwrap();
    let sync = inner.repeated(3).unwrap();
    sync.execute().await.unwrap();

    assert_eq!(sync.num_sync_points(), 6);
    assert_eq!(
        dac.armed_values(0).unwrap(),
        [0.0, 1.0, 0.0, 1.0, 0.0, 1.0]
    );
}

#[tokio::test]
async fn test_conflicting_ramps_fail_at_compile_time() {
    init_logging();
    let dac = Arc::new(MockDac::new("dac"));
    let mut sync = SyncPoints::explicit(vec![0.0, 1.0], vec![0.5, 0.5], None).unwrap();
    // Two ramps on the same channel cannot run simultaneously.
    sync.add_command(
        Arc::clone(&dac) as InstrumentHandle,
        Box::new(DacRampCommand::single(0, vec![0.0, 1.0])),
    );
    sync.add_command(
        Arc::clone(&dac) as InstrumentHandle,
        Box::new(DacRampCommand::single(0, vec![2.0, 3.0])),
    );

    let err = sync.execute().await.unwrap_err();
    assert!(matches!(err, SyncError::Composition(_)));
    // Compile failed before any arming happened.
    assert!(!dac.is_armed());
}

#[tokio::test]
async fn test_arm_failure_propagates_and_cancel_recovers() {
    init_logging();
    let good = ScriptedInstrument::new("good", false, true);
    let bad = ScriptedInstrument::new("bad", true, true);
    let never_reached = ScriptedInstrument::new("late", false, true);

    let mut sync = SyncPoints::explicit(vec![0.0], vec![1.0], None).unwrap();
    sync.add_command(
        Arc::clone(&good) as InstrumentHandle,
        Box::new(AcquireCommand::channel(0)),
    );
    sync.add_command(
        Arc::clone(&bad) as InstrumentHandle,
        Box::new(AcquireCommand::channel(1)),
    );
    sync.add_command(
        Arc::clone(&never_reached) as InstrumentHandle,
        Box::new(AcquireCommand::channel(2)),
    );

    let err = sync.execute().await.unwrap_err();
    match err {
        SyncError::HardwareArm { instrument, .. } => assert_eq!(instrument, "bad"),
        other => panic!("expected HardwareArm, got {other:?}"),
    }

    // Sequential arming stopped at the failure; earlier instruments stay armed.
    assert_eq!(good.prepare_calls.load(Ordering::SeqCst), 1);
    assert_eq!(bad.prepare_calls.load(Ordering::SeqCst), 1);
    assert_eq!(never_reached.prepare_calls.load(Ordering::SeqCst), 0);

    // Documented recovery: cancel the same sync; every instrument is visited.
    let failed = sync.cancel().await;
    assert!(failed.is_empty());
    for instrument in [&good, &bad, &never_reached] {
        assert_eq!(instrument.cancel_calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_cancel_reports_failures_without_short_circuit() {
    init_logging();
    let a = ScriptedInstrument::new("a", false, true);
    let b = ScriptedInstrument::new("b", false, false);
    let c = ScriptedInstrument::new("c", false, true);

    let mut sync = SyncPoints::explicit(vec![0.0], vec![1.0], None).unwrap();
    for (instrument, ch) in [(&a, 0), (&b, 1), (&c, 2)] {
        sync.add_command(
            Arc::clone(instrument) as InstrumentHandle,
            Box::new(AcquireCommand::channel(ch)),
        );
    }

    let failed = sync.cancel().await;
    assert_eq!(failed.len(), 1);
    assert!(failed.contains("b"));
    // The failure did not stop the walk.
    for instrument in [&a, &b, &c] {
        assert_eq!(instrument.cancel_calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_cancel_covers_nested_instruments() {
    init_logging();
    let inner_instr = ScriptedInstrument::new("inner", false, false);
    let outer_instr = ScriptedInstrument::new("outer", false, true);

    let mut inner = SyncPoints::explicit(vec![0.0], vec![1.0], None).unwrap();
    inner.add_command(
        Arc::clone(&inner_instr) as InstrumentHandle,
        Box::new(AcquireCommand::channel(0)),
    );
    let mut sync = inner.repeated(2).unwrap();
    sync.add_command(
        Arc::clone(&outer_instr) as InstrumentHandle,
        Box::new(AcquireCommand::channel(1)),
    );

    let failed = sync.cancel().await;
    assert_eq!(failed.len(), 1);
    assert!(failed.contains("inner"));
    assert_eq!(outer_instr.cancel_calls.load(Ordering::SeqCst), 1);
}

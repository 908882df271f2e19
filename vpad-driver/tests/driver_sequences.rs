//! End-to-end driver sequences against a scripted mock host controller.
//!
//! The mock stands in for the external USB host stack: it serves a canned
//! configuration descriptor, records every outbound frame, and can be
//! scripted to fail writes of a given command family a fixed number of
//! times or to report link trouble.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use vpad_driver::{
    DriverError, DriverState, FlushOutcome, HostController, LinkStatus, PadDriver, PadEvent,
    RecoveryOutcome, Rgb, TransportError,
};
use vpad_transport::protocol::cmd;

const EVENT_IN: u8 = 0x81;
const COMMAND_OUT: u8 = 0x02;
const HALL_IN: u8 = 0x83;

/// Sleep used by the mock when an inbound endpoint has nothing to deliver
const IDLE_READ_MS: u64 = 10;

struct MockHost {
    config: Vec<u8>,
    writes: Mutex<Vec<Vec<u8>>>,
    /// family byte -> remaining number of writes to fail
    fail_families: Mutex<HashMap<u8, usize>>,
    event_frames: Mutex<VecDeque<Vec<u8>>>,
    hall_frames: Mutex<VecDeque<Vec<u8>>>,
    status: Mutex<LinkStatus>,
    frame_counter: Mutex<u16>,
}

impl MockHost {
    fn new() -> Arc<Self> {
        Self::with_config(standard_config())
    }

    fn with_config(config: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            config,
            writes: Mutex::new(Vec::new()),
            fail_families: Mutex::new(HashMap::new()),
            event_frames: Mutex::new(VecDeque::new()),
            hall_frames: Mutex::new(VecDeque::new()),
            status: Mutex::new(LinkStatus {
                connected: true,
                enabled: true,
                frame_counter: 0,
                error_bits: 0,
            }),
            frame_counter: Mutex::new(0),
        })
    }

    fn fail_family(&self, family: u8, times: usize) {
        self.fail_families.lock().insert(family, times);
    }

    fn push_event(&self, frame: &[u8]) {
        self.event_frames.lock().push_back(frame.to_vec());
    }

    fn push_hall(&self, frame: &[u8]) {
        self.hall_frames.lock().push_back(frame.to_vec());
    }

    fn set_error_bits(&self, bits: u8) {
        self.status.lock().error_bits = bits;
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    fn families_written(&self) -> Vec<u8> {
        self.writes.lock().iter().map(|f| f[1]).collect()
    }
}

#[async_trait]
impl HostController for MockHost {
    async fn read_configuration(&self) -> Result<Vec<u8>, TransportError> {
        Ok(self.config.clone())
    }

    async fn assign_address(&self) -> Result<u8, TransportError> {
        Ok(7)
    }

    async fn configure(&self, _device_address: u8) -> Result<(), TransportError> {
        Ok(())
    }

    async fn interrupt_in(
        &self,
        _device_address: u8,
        endpoint: u8,
        _max_len: usize,
        _toggle: bool,
    ) -> Result<Vec<u8>, TransportError> {
        let frame = match endpoint {
            EVENT_IN => self.event_frames.lock().pop_front(),
            HALL_IN => self.hall_frames.lock().pop_front(),
            _ => None,
        };
        match frame {
            Some(frame) => Ok(frame),
            None => {
                tokio::time::sleep(Duration::from_millis(IDLE_READ_MS)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn interrupt_out(
        &self,
        _device_address: u8,
        endpoint: u8,
        frame: &[u8],
        _toggle: bool,
    ) -> Result<(), TransportError> {
        assert_eq!(endpoint, COMMAND_OUT, "all commands go to the OUT endpoint");
        self.writes.lock().push(frame.to_vec());

        if frame.len() >= 2 {
            let mut failures = self.fail_families.lock();
            if let Some(remaining) = failures.get_mut(&frame[1]) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Transfer {
                        endpoint,
                        reason: "scripted failure".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn link_status(&self) -> LinkStatus {
        let mut status = *self.status.lock();
        // advance the SOF counter so continuity checks stay quiet
        let mut counter = self.frame_counter.lock();
        *counter = counter.wrapping_add(17);
        status.frame_counter = *counter;
        status
    }
}

fn standard_config() -> Vec<u8> {
    let mut blob = vec![9, 0x02, 0, 0, 1, 1, 0, 0x80, 50];
    blob.extend([9, 0x04, 0, 0, 3, 0xFF, 0, 0, 0]); // vendor interface
    blob.extend([7, 0x05, EVENT_IN, 0x03, 64, 0, 1]);
    blob.extend([7, 0x05, COMMAND_OUT, 0x03, 64, 0, 1]);
    blob.extend([7, 0x05, HALL_IN, 0x03, 64, 0, 1]);
    blob
}

fn handshake_families() -> Vec<u8> {
    vec![
        cmd::MODE_SETUP,
        cmd::MODE_SETUP,
        cmd::BUTTON_ACTIVATE,
        cmd::STATUS,
        cmd::EFFECTS,
        cmd::BUTTON_ACTIVATE,
        cmd::STATUS,
    ]
}

fn led_families() -> Vec<u8> {
    vec![
        cmd::LED_MODE,
        cmd::LED_PACKAGE,
        cmd::LED_PACKAGE,
        cmd::LED_APPLY,
        cmd::LED_FINALIZE,
    ]
}

fn button_frame(index: u8, pressed: bool) -> Vec<u8> {
    vec![0x43, 0x01, 0x00, 0x00, index, if pressed { 0xC0 } else { 0x40 }]
}

#[tokio::test(flavor = "multi_thread")]
async fn clean_attach_runs_the_full_handshake() {
    let host = MockHost::new();
    let driver = PadDriver::attach(host.clone()).await.expect("attach");

    assert!(driver.is_ready());
    assert_eq!(driver.state(), DriverState::Ready);
    assert_eq!(host.families_written(), handshake_families());
    driver.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn step_retry_never_resends_earlier_steps() {
    let host = MockHost::new();
    // step 3 (button activation) fails twice, then succeeds
    host.fail_family(cmd::BUTTON_ACTIVATE, 2);

    let driver = PadDriver::attach(host.clone()).await.expect("attach");
    assert!(driver.is_ready());

    let families = host.families_written();
    // steps 1/2 sent exactly once each, never re-sent after step 3 began
    let mode_setups: Vec<usize> = families
        .iter()
        .enumerate()
        .filter(|(_, f)| **f == cmd::MODE_SETUP)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(mode_setups, vec![0, 1]);
    // step 3 shows its two failed attempts plus the success, then step 6
    let activations = families
        .iter()
        .filter(|f| **f == cmd::BUTTON_ACTIVATE)
        .count();
    assert_eq!(activations, 4);
    driver.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_handshake_degrades_then_recovery_restarts_from_step_one() {
    let host = MockHost::new();
    // step 3 fails all three attempts: the whole handshake fails
    host.fail_family(cmd::BUTTON_ACTIVATE, 3);

    let driver = PadDriver::attach(host.clone()).await.expect("attach");
    assert!(!driver.is_ready());
    assert_eq!(driver.state(), DriverState::Degraded);

    // wait out the protection window, then let the supervisor escalate
    host.clear_writes();
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let report = driver.tick().await;
    assert_eq!(report.recovery, Some(RecoveryOutcome::Reactivated));
    assert!(driver.is_ready());
    assert_eq!(driver.state(), DriverState::Ready);
    assert_eq!(driver.recovery_attempts(), 1);

    // the re-run started from step 1, then forced a known-good color state
    let mut expected = handshake_families();
    expected.extend(led_families());
    assert_eq!(host.families_written(), expected);
    driver.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn led_update_reaches_the_wire_in_order() {
    let host = MockHost::new();
    let driver = PadDriver::attach(host.clone()).await.expect("attach");
    host.clear_writes();

    let mut colors = vec![Rgb::BLACK; 25];
    colors[0] = Rgb::RED;
    assert!(driver.update_leds(&colors));

    let report = driver.tick().await;
    assert_eq!(report.flush, FlushOutcome::Sent);

    let writes = host.writes();
    assert_eq!(
        writes.iter().map(|f| f[1]).collect::<Vec<_>>(),
        led_families()
    );
    // button 1 red at package1 offset 24, everything else dark
    let package1 = &writes[1];
    assert_eq!(&package1[24..27], &[255, 0, 0]);
    assert!(package1[27..].iter().all(|&b| b == 0));

    // nothing dirty afterwards
    assert_eq!(driver.tick().await.flush, FlushOutcome::Clean);
    driver.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn quiet_period_defers_and_only_the_latest_state_is_sent() {
    let host = MockHost::new();
    let driver = PadDriver::attach(host.clone()).await.expect("attach");
    host.clear_writes();

    // a button press observed by ingestion opens the quiet window
    host.push_event(&button_frame(2, true));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        driver.poll_event(),
        Some(PadEvent::Button {
            index: 2,
            pressed: true
        })
    );

    assert!(driver.update_leds(&vec![Rgb::RED; 25]));
    assert_eq!(driver.tick().await.flush, FlushOutcome::Deferred);

    // a newer state supersedes the deferred one
    assert!(driver.update_leds(&vec![Rgb::BLUE; 25]));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(driver.tick().await.flush, FlushOutcome::Sent);

    let writes = host.writes();
    // exactly one LED sequence went out: no intermediate flicker state
    let mode_selects = writes.iter().filter(|f| f[1] == cmd::LED_MODE).count();
    assert_eq!(mode_selects, 1);
    let package1 = writes
        .iter()
        .find(|f| f[1] == cmd::LED_PACKAGE && f[2] == 0x00)
        .expect("package1 on the wire");
    assert_eq!(&package1[24..27], &[0, 0, 255], "only the blue state was sent");
    assert_eq!(driver.events_lost(), 0);
    driver.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn hall_readings_flow_through_the_queue() {
    let host = MockHost::new();
    let driver = PadDriver::attach(host.clone()).await.expect("attach");

    host.push_hall(&[0x48, 0x07, 0x34, 0x12]);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        driver.poll_event(),
        Some(PadEvent::Hall {
            sensor: 7,
            raw: 0x1234
        })
    );
    driver.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn incomplete_endpoint_pair_fails_attach() {
    let mut blob = vec![9, 0x02, 0, 0, 1, 1, 0, 0x80, 50];
    blob.extend([9, 0x04, 0, 0, 1, 0xFF, 0, 0, 0]);
    blob.extend([7, 0x05, EVENT_IN, 0x03, 64, 0, 1]); // IN only, no OUT

    let host = MockHost::with_config(blob);
    let result = PadDriver::attach(host).await;
    assert!(matches!(
        result,
        Err(DriverError::Transport(TransportError::Topology(_)))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn corruption_refuses_writes_until_probe_validates() {
    let host = MockHost::new();
    let driver = PadDriver::attach(host.clone()).await.expect("attach");
    host.clear_writes();

    // transport reports error bits: protection window opens
    host.set_error_bits(0x04);
    let report = driver.tick().await;
    assert_eq!(report.flush, FlushOutcome::Refused);
    assert!(!driver.is_ready());
    assert_eq!(driver.state(), DriverState::Degraded);

    // updates are still accepted, just deferred behind the window
    assert!(driver.update_leds(&vec![Rgb::GREEN; 25]));
    assert_eq!(driver.tick().await.flush, FlushOutcome::Refused);
    assert!(host.writes().is_empty(), "no LED frames during protection");

    // error condition clears; after the window a probe validates the device
    host.set_error_bits(0);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let report = driver.tick().await;
    assert_eq!(report.recovery, Some(RecoveryOutcome::Responsive));
    assert!(driver.is_ready());

    // next tick flushes the deferred state
    assert_eq!(driver.tick().await.flush, FlushOutcome::Sent);
    driver.shutdown();
}

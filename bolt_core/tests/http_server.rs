//! End-to-end flows: real HTTP over a loopback socket against a sim-backed
//! control loop. The test drives ticks by hand and scripts the bench physics
//! through the simulation link, so every scenario is deterministic.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use bolt_core::actuator::Actuator;
use bolt_core::auth::sign_nonce;
use bolt_core::display::DisplayMirror;
use bolt_core::fsm::{FsmConfig, LockFsm};
use bolt_core::mocks::{CountingWatchdog, ManualClock, MemoryNonceStore};
use bolt_core::sensor::{FeedbackTable, PositionSensor};
use bolt_core::server::{LockServer, ServerConfig};
use bolt_core::state::LockState;
use bolt_core::RequestAuth;
use bolt_hardware::sim::{SimFeedback, SimLink, SimPanel, SimServo};
use bolt_traits::NonceStore;

const SECRET: &[u8] = b"randomlychosenpass";
const LOCK_DEG: i32 = 120;
const UNLOCK_DEG: i32 = 50;

struct Bench {
    server: LockServer<SimServo, SimFeedback, MemoryNonceStore>,
    link: SimLink,
    clock: ManualClock,
    store: MemoryNonceStore,
    watchdog: CountingWatchdog,
    panel: SimPanel,
    addr: std::net::SocketAddr,
    next_nonce: u32,
}

impl Bench {
    /// Sim server with the FSM rehydrated at `initial` and the bolt at
    /// `initial_deg`. `sluggish` makes the servo move only when the test
    /// steps the motor, so `BusyMove` windows are observable.
    fn new(initial: LockState, initial_deg: i32, sluggish: bool) -> Self {
        let link = if sluggish {
            SimLink::sluggish(initial_deg)
        } else {
            SimLink::new(initial_deg)
        };
        let clock = ManualClock::new();
        let store = MemoryNonceStore::default();
        let watchdog = CountingWatchdog::default();
        let panel = SimPanel::default();

        // Anchors matching the sim feedback model exactly.
        let sensor = PositionSensor::with_tables(
            link.feedback(),
            0,
            180,
            FeedbackTable {
                min_feedback: 100,
                max_feedback: 820,
            },
            FeedbackTable {
                min_feedback: 130,
                max_feedback: 850,
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut server = LockServer::new(
            listener,
            Actuator::new(link.servo()),
            sensor,
            RequestAuth::new(store.clone(), SECRET),
            DisplayMirror::new(Box::new(panel.clone())),
            Box::new(watchdog.clone()),
            Arc::new(clock.clone()),
            ServerConfig::default(),
        )
        .unwrap();

        *server.fsm_mut() = LockFsm::restore(
            FsmConfig::default(),
            initial,
            LOCK_DEG,
            UNLOCK_DEG,
            0,
            None,
        );
        let addr = server.local_addr().unwrap();

        Self {
            server,
            link,
            clock,
            store,
            watchdog,
            panel,
            addr,
            next_nonce: 10,
        }
    }

    fn fresh_nonce(&mut self) -> u32 {
        self.next_nonce += 10;
        self.next_nonce
    }

    /// Send raw request text, run one tick, return (status, body).
    fn roundtrip(&mut self, request: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        self.server.tick().unwrap();

        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        let status = response
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.to_string())
            .unwrap_or_default();
        (status, body)
    }

    fn signed(&mut self, method: &str, path: &str) -> (u16, String) {
        let nonce = self.fresh_nonce().to_string();
        let sig = sign_nonce(SECRET, &nonce);
        self.roundtrip(&format!(
            "{method} {path} HTTP/1.1\r\nHost: bench\r\nX-Nonce: {nonce}\r\nX-Signature: {sig}\r\nConnection: close\r\n\r\n"
        ))
    }

    fn status(&mut self) -> (u16, String) {
        self.signed("GET", "/status")
    }
}

#[test]
fn lock_to_unlock_happy_path() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, true);

    let (code, body) = bench.signed("POST", "/unlock");
    assert_eq!(code, 200);
    assert_eq!(body, "BUSY_MOVE");
    assert!(bench.link.is_attached(), "motor powered during the move");

    // Part way there: still moving.
    bench.link.step_motor(30);
    let (code, body) = bench.status();
    assert_eq!((code, body.as_str()), (200, "BUSY_MOVE"));

    // Arrive; the next tick observes the endpoint and settles.
    bench.link.step_motor(90);
    let (code, body) = bench.status();
    assert_eq!((code, body.as_str()), (200, "UNLOCK"));
    assert!(!bench.link.is_attached(), "motor released after the move");
}

#[test]
fn unlock_to_lock_happy_path() {
    let mut bench = Bench::new(LockState::Unlocked, UNLOCK_DEG, true);

    let (code, body) = bench.signed("POST", "/lock");
    assert_eq!(code, 200);
    assert_eq!(body, "BUSY_MOVE");

    bench.link.step_motor(200);
    let (code, body) = bench.status();
    assert_eq!((code, body.as_str()), (200, "LOCK"));
}

#[test]
fn stalled_move_times_out_into_bad() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, true);

    let (code, body) = bench.signed("POST", "/unlock");
    assert_eq!((code, body.as_str()), (200, "BUSY_MOVE"));

    // The motor never advances; wall clock sails past the move timeout.
    bench.clock.advance_ms(6000);
    let (code, body) = bench.signed("POST", "/lock");
    assert_eq!((code, body.as_str()), (503, "BAD"));
    assert!(!bench.link.is_attached(), "fault releases the motor");

    // Bad is terminal: everything keeps reporting it.
    let (code, body) = bench.status();
    assert_eq!((code, body.as_str()), (200, "BAD"));
    let (code, body) = bench.signed("POST", "/unlock");
    assert_eq!((code, body.as_str()), (503, "BAD"));
}

#[test]
fn manual_interference_settles_without_requests() {
    let mut bench = Bench::new(LockState::Unlocked, UNLOCK_DEG, false);

    // Someone turns the bolt by hand; no HTTP traffic at all.
    bench.link.set_position(80);
    assert_eq!(bench.server.tick().unwrap(), LockState::BusyWait);

    bench.link.set_position(LOCK_DEG);
    assert_eq!(bench.server.tick().unwrap(), LockState::Locked);
}

#[test]
fn replayed_nonce_is_rejected() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, false);
    bench.store.store(1000).unwrap();

    // 995 sits exactly on the replay floor for N_last = 1000.
    let sig = sign_nonce(SECRET, "995");
    let (code, body) = bench.roundtrip(&format!(
        "GET /status HTTP/1.1\r\nX-Nonce: 995\r\nX-Signature: {sig}\r\n\r\n"
    ));
    assert_eq!(code, 403);
    assert!(body.is_empty(), "auth failures carry no body");
    assert_eq!(bench.store.value(), 1000);

    // One above the floor is admitted and advances the slot.
    let sig = sign_nonce(SECRET, "996");
    let (code, body) = bench.roundtrip(&format!(
        "GET /status HTTP/1.1\r\nX-Nonce: 996\r\nX-Signature: {sig}\r\n\r\n"
    ));
    assert_eq!((code, body.as_str()), (200, "LOCK"));
    assert_eq!(bench.store.value(), 996);
}

#[test]
fn wrong_side_command_is_rejected_with_state_body() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, false);

    let (code, body) = bench.signed("POST", "/lock");
    assert_eq!((code, body.as_str()), (503, "LOCK"));
    assert_eq!(bench.server.fsm().state(), LockState::Locked);
    assert_eq!(bench.server.fsm().current_cmd(), None);
}

#[test]
fn cors_preflight_needs_no_auth_and_moves_nothing() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, false);

    let mut stream = TcpStream::connect(bench.addr).unwrap();
    stream
        .write_all(b"OPTIONS /unlock HTTP/1.1\r\nOrigin: http://app\r\n\r\n")
        .unwrap();
    bench.server.tick().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();

    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(response.contains("Access-Control-Allow-Origin: *"));
    assert!(response.contains("Access-Control-Allow-Headers: Content-Type, X-Nonce, X-Signature"));
    assert!(response.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
    assert_eq!(bench.server.fsm().state(), LockState::Locked);
    assert_eq!(bench.store.value(), 0, "preflight never touches the slot");
}

#[test]
fn connect_probe_reports_state() {
    let mut bench = Bench::new(LockState::Unlocked, UNLOCK_DEG, false);
    let (code, body) = bench.signed("POST", "/connect");
    assert_eq!((code, body.as_str()), (200, "UNLOCK"));
}

#[test]
fn bad_signature_is_forbidden_and_empty() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, false);
    let (code, body) = bench.roundtrip(
        "POST /unlock HTTP/1.1\r\nX-Nonce: 50\r\nX-Signature: 00ff\r\n\r\n",
    );
    assert_eq!(code, 403);
    assert!(body.is_empty());
    assert_eq!(bench.server.fsm().state(), LockState::Locked, "no transition");
}

#[test]
fn unknown_endpoint_matches_failed_auth_on_the_wire() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, false);
    let unknown = bench.roundtrip("GET /admin HTTP/1.1\r\n\r\n");
    let unauthed = bench.roundtrip("POST /lock HTTP/1.1\r\n\r\n");
    assert_eq!(unknown, unauthed, "both are bare 403s");
}

#[test]
fn watchdog_is_fed_every_tick_and_display_mirrors_state() {
    let mut bench = Bench::new(LockState::Locked, LOCK_DEG, false);

    bench.server.tick().unwrap();
    bench.server.tick().unwrap();
    bench.server.tick().unwrap();
    assert_eq!(bench.watchdog.feeds(), 3);

    assert_eq!(
        bench.panel.last_glyph().as_ref(),
        Some(bolt_core::display::glyph_for(LockState::Locked)),
        "panel shows the settled state"
    );

    bench.link.set_position(80);
    bench.server.tick().unwrap();
    assert_eq!(
        bench.panel.last_glyph().as_ref(),
        Some(bolt_core::display::glyph_for(LockState::BusyWait)),
    );
}

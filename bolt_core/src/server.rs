//! The cooperative control loop.
//!
//! Single-threaded, roughly 10 Hz. Each tick accepts at most one client,
//! resolves its request against the state produced by this tick's FSM
//! transition, and answers from that post-transition state. There are no
//! worker threads and no queues; a second request arriving in the same tick
//! window stays in the TCP backlog until the next tick.
//!
//! The calibration button is the only input crossing an interrupt boundary.
//! It arrives as an atomic flag that is consumed exactly once per tick.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bolt_traits::{AnalogInput, Clock, NonceStore, Servo, Watchdog};
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::auth::RequestAuth;
use crate::display::DisplayMirror;
use crate::error::Result;
use crate::fsm::{FsmConfig, LockFsm};
use crate::http::{self, Request};
use crate::sensor::PositionSensor;
use crate::state::{Command, LockState};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub fsm: FsmConfig,
    /// Target control-loop period.
    pub tick_period: Duration,
    /// Upper bound on reading one client's header block. An uncooperative
    /// client is dropped with a 403 rather than stalling the loop past the
    /// hardware watchdog.
    pub client_read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fsm: FsmConfig::default(),
            tick_period: Duration::from_millis(100),
            client_read_timeout: Duration::from_millis(2500),
        }
    }
}

pub struct LockServer<M, A, S> {
    listener: TcpListener,
    actuator: Actuator<M>,
    sensor: PositionSensor<A>,
    auth: RequestAuth<S>,
    fsm: LockFsm,
    mirror: DisplayMirror,
    watchdog: Box<dyn Watchdog>,
    clock: Arc<dyn Clock + Send + Sync>,
    calibrate_flag: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    epoch: Instant,
    cfg: ServerConfig,
}

impl<M, A, S> LockServer<M, A, S>
where
    M: Servo,
    A: AnalogInput,
    S: NonceStore,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: TcpListener,
        actuator: Actuator<M>,
        sensor: PositionSensor<A>,
        auth: RequestAuth<S>,
        mirror: DisplayMirror,
        watchdog: Box<dyn Watchdog>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: ServerConfig,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let epoch = clock.now();
        Ok(Self {
            listener,
            actuator,
            sensor,
            auth,
            fsm: LockFsm::new(cfg.fsm),
            mirror,
            watchdog,
            clock,
            calibrate_flag: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            epoch,
            cfg,
        })
    }

    /// Flag set by the calibration-button edge. The loop consumes it once per
    /// tick; setters only ever store `true`.
    pub fn calibrate_flag(&self) -> Arc<AtomicBool> {
        self.calibrate_flag.clone()
    }

    /// Cooperative stop for embedding the loop in tests and demos.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn fsm(&self) -> &LockFsm {
        &self.fsm
    }

    pub fn fsm_mut(&mut self) -> &mut LockFsm {
        &mut self.fsm
    }

    pub fn actuator(&self) -> &Actuator<M> {
        &self.actuator
    }

    fn accept_one(&mut self) -> Option<TcpStream> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "client accepted");
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(error = %e, "client socket setup failed");
                    return None;
                }
                if let Err(e) = stream.set_read_timeout(Some(self.cfg.client_read_timeout)) {
                    warn!(error = %e, "client read timeout setup failed");
                    return None;
                }
                Some(stream)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "accept failed");
                None
            }
        }
    }

    /// One loop iteration. Returns the post-transition state.
    pub fn tick(&mut self) -> Result<LockState> {
        // 1) at most one client per tick
        let mut client = self.accept_one();
        let request = client
            .as_mut()
            .map(|stream| http::classify(&http::read_raw(stream), &mut self.auth));

        let cmd = match request {
            Some(Request::Lock) => Some(Command::Lock),
            Some(Request::Unlock) => Some(Command::Unlock),
            _ => None,
        };

        // 2) position, against the anchors matching the drive state
        let deg = self.sensor.sample(self.actuator.is_attached())?;

        // 3) consume the button flag
        let calibrate_pressed = self.calibrate_flag.swap(false, Ordering::SeqCst);

        // 4) transition
        let now_ms = self.clock.ms_since(self.epoch);
        let state = self
            .fsm
            .step(deg, now_ms, calibrate_pressed, cmd, &mut self.actuator)?;

        // 5) answer from the post-transition state
        if let (Some(stream), Some(req)) = (client.as_mut(), request) {
            if let Err(e) = http::respond(stream, req, state) {
                debug!(error = %e, "client response write failed");
            }
        }

        // 6) the loop is alive
        self.watchdog.feed();

        // 7) mirror
        self.mirror.update(state);

        Ok(state)
    }

    /// Run ticks at the configured period until the shutdown flag is raised.
    pub fn run(&mut self) -> Result<()> {
        info!(period_ms = self.cfg.tick_period.as_millis() as u64, "control loop started");
        while !self.shutdown.load(Ordering::Relaxed) {
            let t0 = self.clock.now();
            self.tick()?;
            let spent = self.clock.now().saturating_duration_since(t0);
            if let Some(rest) = self.cfg.tick_period.checked_sub(spent) {
                self.clock.sleep(rest);
            }
        }
        info!("control loop stopped");
        Ok(())
    }
}

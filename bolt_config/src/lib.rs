use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Network {
    /// Address the control surface binds to. Wi-Fi association itself is the
    /// platform's job; `ssid`/`psk` are recorded here for provisioning and
    /// startup logging only.
    pub bind_addr: String,
    pub port: u16,
    pub ssid: Option<String>,
    pub psk: Option<String>,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 80,
            ssid: None,
            psk: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Shared HMAC secret. Must be non-empty unless `skip_auth` is set.
    pub secret: String,
    /// Test-only escape hatch: accept every well-formed request.
    pub skip_auth: bool,
    /// Wipe the persisted nonce slot at boot.
    pub reset_nonce: bool,
    /// Path of the single-slot nonce file.
    pub nonce_file: String,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            secret: String::new(),
            skip_auth: false,
            reset_nonce: false,
            nonce_file: "var/nonce.slot".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServoCfg {
    /// Bolt angle at the locked endpoint, degrees.
    pub lock_deg: i32,
    /// Bolt angle at the unlocked endpoint, degrees.
    pub unlock_deg: i32,
    /// Half-width of the "at endpoint" band.
    pub angle_tolerance_deg: i32,
    /// BusyMove watchdog, milliseconds.
    pub move_timeout_ms: u64,
    /// Travel endpoints used for bringup feedback calibration.
    pub min_pos: i32,
    pub max_pos: i32,
    /// Mechanical settle before reading a powered anchor.
    pub settle_powered_ms: u64,
    /// Settle after cutting power before the released anchor.
    pub settle_released_ms: u64,
    /// Control loop period.
    pub tick_ms: u64,
}

impl Default for ServoCfg {
    fn default() -> Self {
        Self {
            lock_deg: 120,
            unlock_deg: 50,
            angle_tolerance_deg: 5,
            move_timeout_ms: 5000,
            min_pos: 0,
            max_pos: 180,
            settle_powered_ms: 2000,
            settle_released_ms: 500,
            tick_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Pins {
    pub servo_pwm: u8,
    pub servo_supply: u8,
    pub calibrate_button: u8,
    pub button_active_low: bool,
    pub button_poll_ms: u64,
    pub feedback_adc_channel: u8,
    pub watchdog_device: String,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            servo_pwm: 18,
            servo_supply: 23,
            calibrate_button: 24,
            button_active_low: true,
            button_poll_ms: 5,
            feedback_adc_channel: 0,
            watchdog_device: "/dev/watchdog".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub network: Network,
    pub auth: Auth,
    pub servo: ServoCfg,
    pub pins: Pins,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret.is_empty() && !self.auth.skip_auth {
            return Err(ConfigError::Invalid(
                "auth.secret must be set unless skip_auth is enabled",
            ));
        }
        if self.network.port == 0 {
            return Err(ConfigError::Invalid("network.port must be > 0"));
        }
        if self.servo.angle_tolerance_deg < 0 {
            return Err(ConfigError::Invalid("angle_tolerance_deg must be >= 0"));
        }
        if self.servo.move_timeout_ms == 0 {
            return Err(ConfigError::Invalid("move_timeout_ms must be > 0"));
        }
        if self.servo.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be > 0"));
        }
        // Endpoint bands must not overlap or the position predicates become
        // ambiguous.
        let tol = self.servo.angle_tolerance_deg;
        if self.servo.unlock_deg + tol >= self.servo.lock_deg - tol {
            return Err(ConfigError::Invalid(
                "unlock_deg and lock_deg bands overlap; widen the angles or shrink the tolerance",
            ));
        }
        if self.servo.min_pos >= self.servo.max_pos {
            return Err(ConfigError::Invalid("min_pos must be < max_pos"));
        }
        if self.servo.unlock_deg < self.servo.min_pos || self.servo.lock_deg > self.servo.max_pos {
            return Err(ConfigError::Invalid(
                "lock endpoints must lie within the calibration travel",
            ));
        }
        Ok(())
    }
}

use crate::context::{Body, DisplayMode};
use crate::relay::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_UPSTREAM};
use crate::simulator::{SimulatorConfig, StopPolicy};
use std::path::PathBuf;

/// Configuration for the relay server
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub upstream_url: String,
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upstream_url: DEFAULT_UPSTREAM.to_string(),
            timeout_secs: 60,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the terminal globe
#[derive(Clone, Debug)]
pub struct SimulateConfig {
    pub body: Body,
    pub mode: DisplayMode,
    pub stop_policy: StopPolicy,
    pub seed: Option<u64>,
    pub simulator: SimulatorConfig,
    pub time_step: f32,     // Seconds per frame
    pub rotation_speed: f32, // Radians per second
    pub tilt: f32,          // Radians, positive tips the north pole toward the viewer
    pub log_file: Option<PathBuf>,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            body: Body::Earth,
            mode: DisplayMode::Cyber,
            stop_policy: StopPolicy::default(),
            seed: None,
            simulator: SimulatorConfig::default(),
            time_step: 0.05,
            rotation_speed: 0.3,
            tilt: 0.35,
            log_file: None,
        }
    }
}

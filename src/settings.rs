use crate::analysis::{WeatherClient, DEFAULT_AIR_QUALITY_URL, DEFAULT_WEATHER_URL};
use crate::config::{RelayConfig, SimulateConfig};
use crate::context::Body;
use crate::relay::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_UPSTREAM};
use crate::simulator::StopPolicy;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub simulator: SimulatorSettings,
    #[serde(default)]
    pub weather: WeatherSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    pub upstream_url: String,
    pub timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upstream_url: DEFAULT_UPSTREAM.to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub stop_policy: StopPolicy,
    pub seed: Option<u64>,
    pub body: Body,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    pub base_url: String,
    pub air_quality_url: String,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WEATHER_URL.to_string(),
            air_quality_url: DEFAULT_AIR_QUALITY_URL.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub endpoint: Option<String>, // Defaults to the local relay
    pub model: Option<String>,
    pub api_key: Option<String>,
}

impl Settings {
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring invalid settings file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("globe-events")
            .join("config.toml")
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            host: self.relay.host.clone(),
            port: self.relay.port,
            upstream_url: self.relay.upstream_url.clone(),
            timeout_secs: self.relay.timeout_secs,
        }
    }

    pub fn simulate_config(&self) -> SimulateConfig {
        SimulateConfig {
            body: self.simulator.body,
            stop_policy: self.simulator.stop_policy,
            seed: self.simulator.seed,
            ..SimulateConfig::default()
        }
    }

    pub fn weather_client(&self) -> WeatherClient {
        WeatherClient::new(self.weather.base_url.clone())
            .with_air_quality_url(self.weather.air_quality_url.clone())
    }

    /// Chat endpoint for analysis requests; the local relay unless overridden
    pub fn analysis_endpoint(&self) -> String {
        self.analysis.endpoint.clone().unwrap_or_else(|| {
            format!("http://{}:{}{}", self.relay.host, self.relay.port, crate::relay::PROXY_PATH)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let s = Settings::parse("").unwrap();
        assert_eq!(s.relay.port, 3001);
        assert_eq!(s.relay.host, "127.0.0.1");
        assert_eq!(s.relay.upstream_url, DEFAULT_UPSTREAM);
        assert_eq!(s.simulator.stop_policy, StopPolicy::CancelAll);
        assert_eq!(s.weather.base_url, DEFAULT_WEATHER_URL);
        assert_eq!(s.weather.air_quality_url, DEFAULT_AIR_QUALITY_URL);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let s = Settings::parse(
            r#"
            [relay]
            port = 8080

            [simulator]
            stop_policy = "drain"
            seed = 42
            body = "mars"
            "#,
        )
        .unwrap();
        assert_eq!(s.relay.port, 8080);
        assert_eq!(s.relay.host, "127.0.0.1");
        assert_eq!(s.simulator.stop_policy, StopPolicy::Drain);
        assert_eq!(s.simulator.seed, Some(42));

        let sim = s.simulate_config();
        assert_eq!(sim.body, Body::Mars);
        assert_eq!(sim.seed, Some(42));
        assert_eq!(s.relay_config().bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn air_quality_url_can_be_overridden_alone() {
        let s = Settings::parse("[weather]\nair_quality_url = \"http://localhost:9000\"").unwrap();
        assert_eq!(s.weather.base_url, DEFAULT_WEATHER_URL);
        assert_eq!(s.weather.air_quality_url, "http://localhost:9000");
    }

    #[test]
    fn unknown_policy_is_an_error() {
        assert!(Settings::parse("[simulator]\nstop_policy = \"sometimes\"").is_err());
    }

    #[test]
    fn analysis_goes_through_local_relay_by_default() {
        let s = Settings::parse("[relay]\nport = 4000").unwrap();
        assert_eq!(s.analysis_endpoint(), "http://127.0.0.1:4000/proxy/xiaomi");
    }
}

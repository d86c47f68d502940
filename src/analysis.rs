//! Glue for the remote services the globe pages consult
//!
//! AI answers are parsed into typed structs and range-checked before any of
//! it is shown; a malformed answer is an error, not a page full of defaults.
//! Weather comes from Open-Meteo and is turned into marker colours for the
//! climate page; agri clicks also look up the local air quality.

use crate::error::AnalysisError;
use crate::projection::GeoPoint;
use crate::scene::{palette, Rgb};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Area analysis
// ============================================================================

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CropMatch {
    pub name: String,
    pub season: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub match_score: f64,
}

/// Agronomy analysis of one location, as returned by the chat model
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AreaAnalysis {
    pub soil_type: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub elevation: f64,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub temp_c: f64,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub wind_kph: f64,
    pub crops: Vec<CropMatch>,
    pub analysis_brief: String,
}

/// The prompt template shows numbers as quoted placeholders, so models
/// sometimes answer `"120"` instead of `120`. Both are accepted; anything
/// that is not a number is rejected.
fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .trim_end_matches('m')
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got {:?}", s))),
    }
}

impl AreaAnalysis {
    fn validate(self) -> Result<Self, AnalysisError> {
        if self.soil_type.trim().is_empty() {
            return Err(schema("soil_type", "empty"));
        }
        if !(-500.0..=9000.0).contains(&self.elevation) {
            return Err(schema("elevation", format!("{} m is not on Earth", self.elevation)));
        }
        if !(-90.0..=60.0).contains(&self.temp_c) {
            return Err(schema("temp_c", format!("{} C", self.temp_c)));
        }
        if !(0.0..=500.0).contains(&self.wind_kph) {
            return Err(schema("wind_kph", format!("{} kph", self.wind_kph)));
        }
        if self.crops.is_empty() {
            return Err(schema("crops", "no crops"));
        }
        for crop in &self.crops {
            if crop.name.trim().is_empty() {
                return Err(schema("crops.name", "empty"));
            }
            if !(0.0..=100.0).contains(&crop.match_score) {
                return Err(schema("crops.match_score", format!("{} not in 0-100", crop.match_score)));
            }
        }
        Ok(self)
    }
}

fn schema(field: &'static str, reason: impl Into<String>) -> AnalysisError {
    AnalysisError::Schema {
        field,
        reason: reason.into(),
    }
}

/// Prompt asking the chat model for a JSON agronomy report on `point`
pub fn area_prompt(point: GeoPoint) -> String {
    format!(
        r#"Act as an expert Agronomist AI.
Perform a deep analysis for coordinates: {lat}, {lon}.

Return a strictly valid JSON object with:
{{
    "soil_type": "Scientific Name (e.g. Vertisols)",
    "elevation": "Integer (m)",
    "temp_c": "Number",
    "wind_kph": "Number",
    "crops": [
        {{ "name": "Crop Name", "season": "Season (e.g. Kharif/Rabi)", "match_score": "Integer (0-100)" }},
        {{ "name": "Crop Name", "season": "Season", "match_score": "Integer" }},
        {{ "name": "Crop Name", "season": "Season", "match_score": "Integer" }}
    ],
    "analysis_brief": "One short sentence summary."
}}
Do not include markdown."#,
        lat = point.lat(),
        lon = point.lon(),
    )
}

/// Drop markdown code fences models add despite being told not to.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

pub fn parse_area_analysis(text: &str) -> Result<AreaAnalysis, AnalysisError> {
    let clean = strip_code_fences(text);
    if clean.is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }
    let analysis: AreaAnalysis = serde_json::from_str(&clean)?;
    analysis.validate()
}

// ============================================================================
// Chat completion envelope
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Text of the first choice of an OpenAI-style chat completion body
pub fn completion_text(body: &str) -> Result<String, AnalysisError> {
    let completion: ChatCompletion = serde_json::from_str(body)?;
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or(AnalysisError::EmptyResponse)
}

/// Talks to the chat model through the local relay.
pub struct ChatClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn ask(&self, prompt: &str) -> Result<String, AnalysisError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut call = ureq::post(&self.endpoint)
            .timeout(self.timeout)
            .set("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            call = call.set("api-key", key);
        }

        let body = match call.send_json(&request) {
            Ok(resp) => resp.into_string().map_err(|e| AnalysisError::Network(e.to_string()))?,
            Err(ureq::Error::Status(code, resp)) => {
                let detail = resp.into_string().unwrap_or_default();
                return Err(AnalysisError::Network(format!("status {}: {}", code, detail)));
            }
            Err(e) => return Err(AnalysisError::Network(e.to_string())),
        };

        completion_text(&body)
    }

    pub fn analyze_area(&self, point: GeoPoint) -> Result<AreaAnalysis, AnalysisError> {
        let text = self.ask(&area_prompt(point))?;
        debug!(%point, len = text.len(), "analysis reply received");
        parse_area_analysis(&text)
    }

    /// Free-text question, answered as plain text
    pub fn ask_topic(&self, query: &str) -> Result<String, AnalysisError> {
        self.ask(&topic_prompt(query))
    }
}

pub fn topic_prompt(query: &str) -> String {
    format!("You are a professional space-tech assistant. Topic: {}", query)
}

// ============================================================================
// Climate
// ============================================================================

/// Reference cities shown on the climate page
pub const CLIMATE_STATIONS: [(&str, GeoPoint); 5] = [
    ("New York", GeoPoint::new(40.71, -74.00)),
    ("London", GeoPoint::new(51.50, -0.12)),
    ("Tokyo", GeoPoint::new(35.67, 139.65)),
    ("Sydney", GeoPoint::new(-33.86, 151.20)),
    ("Mumbai", GeoPoint::new(19.07, 72.87)),
];

pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com";

#[derive(Clone, Debug, PartialEq)]
pub struct StationReading {
    pub name: &'static str,
    pub point: GeoPoint,
    pub temperature_c: f64,
}

/// Hot above 30 C, cold below 10 C, otherwise the climate cyan.
pub fn temperature_color(temperature_c: f64) -> Rgb {
    if temperature_c > 30.0 {
        palette::HOT_RED
    } else if temperature_c < 10.0 {
        palette::COLD_BLUE
    } else {
        palette::CLIMATE_CYAN
    }
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    current_weather: CurrentWeather,
}

/// Current UV index and fine particulates at a point. Either may be
/// missing where the model has no coverage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct AirQuality {
    pub uv_index: Option<f64>,
    pub pm2_5: Option<f64>,
}

impl fmt::Display for AirQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uv_index {
            Some(uv) => write!(f, "UV {:.1}", uv)?,
            None => write!(f, "UV -")?,
        }
        match self.pm2_5 {
            Some(pm) => write!(f, " | PM2.5 {:.1}", pm),
            None => write!(f, " | PM2.5 -"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    current: AirQuality,
}

pub fn parse_air_quality(body: &str) -> Result<AirQuality, AnalysisError> {
    let response: AirQualityResponse = serde_json::from_str(body)?;
    Ok(response.current)
}

pub struct WeatherClient {
    base_url: String,
    air_quality_url: String,
    timeout: Duration,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            air_quality_url: DEFAULT_AIR_QUALITY_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_air_quality_url(mut self, url: impl Into<String>) -> Self {
        self.air_quality_url = url.into();
        self
    }

    fn get(&self, url: &str) -> Result<String, AnalysisError> {
        let response = ureq::get(url)
            .timeout(self.timeout)
            .call()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let mut body = String::new();
        response
            .into_reader()
            .take(1 << 20)
            .read_to_string(&mut body)
            .map_err(|e| AnalysisError::Network(e.to_string()))?;
        Ok(body)
    }

    pub fn current_temperature(&self, point: GeoPoint) -> Result<f64, AnalysisError> {
        let url = format!(
            "{}/v1/forecast?latitude={}&longitude={}&current_weather=true",
            self.base_url.trim_end_matches('/'),
            point.lat(),
            point.lon()
        );
        let weather: WeatherResponse = serde_json::from_str(&self.get(&url)?)?;
        Ok(weather.current_weather.temperature)
    }

    pub fn air_quality(&self, point: GeoPoint) -> Result<AirQuality, AnalysisError> {
        let url = format!(
            "{}/v1/air-quality?latitude={}&longitude={}&current=uv_index,pm2_5",
            self.air_quality_url.trim_end_matches('/'),
            point.lat(),
            point.lon()
        );
        parse_air_quality(&self.get(&url)?)
    }

    /// Readings for every reference station that answered. Failed stations
    /// are logged and skipped.
    pub fn station_readings(&self) -> Vec<StationReading> {
        CLIMATE_STATIONS
            .iter()
            .filter_map(|&(name, point)| match self.current_temperature(point) {
                Ok(temperature_c) => Some(StationReading {
                    name,
                    point,
                    temperature_c,
                }),
                Err(e) => {
                    warn!(station = name, error = %e, "weather fetch failed");
                    None
                }
            })
            .collect()
    }
}

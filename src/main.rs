use clap::{Parser, Subcommand};
use globe_events::analysis::{ChatClient, CLIMATE_STATIONS};
use globe_events::config::SimulateConfig;
use globe_events::scene::MemoryBackend;
use globe_events::scheduler::Scheduled;
use globe_events::settings::Settings;
use globe_events::terminal::Terminal;
use globe_events::{
    analysis, forward, inverse, relay, view, Body, CartesianPoint, DisplayMode, EventSimulator,
    GeoPoint, GlobeContext, StopPolicy,
};
use std::error::Error;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "globe-events")]
#[command(author = "Terminal Art Generator")]
#[command(version = "0.1.0")]
#[command(about = "Globe projection and transient event engine, with a chat API relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP relay for the chat completion API
    Relay {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Upstream chat completion URL
        #[arg(short, long)]
        upstream: Option<String>,
    },

    /// Run the event simulation on a terminal globe
    Simulate {
        /// Body to display
        #[arg(short, long, value_enum)]
        body: Option<Body>,

        /// Display mode to start in
        #[arg(short, long, value_enum, default_value = "cyber")]
        mode: DisplayMode,

        /// What stopping the simulation does with scheduled work
        #[arg(long, value_enum)]
        policy: Option<StopPolicy>,

        /// Random seed for reproducibility
        #[arg(short, long)]
        seed: Option<u64>,

        /// Seconds per frame
        #[arg(short, long, default_value = "0.05")]
        time: f32,

        /// Log file (the terminal is taken by the globe)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Run without a terminal for this many virtual milliseconds and
        /// print a summary
        #[arg(long, value_name = "MS")]
        headless: Option<u64>,
    },

    /// Project a latitude/longitude onto the globe
    Project {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        #[arg(short, long, value_enum, default_value = "earth")]
        body: Body,
    },

    /// Recover latitude/longitude from a point in globe space
    Unproject {
        #[arg(allow_negative_numbers = true)]
        x: f64,
        #[arg(allow_negative_numbers = true)]
        y: f64,
        #[arg(allow_negative_numbers = true)]
        z: f64,
        #[arg(short, long, value_enum, default_value = "earth")]
        body: Body,
    },

    /// Current temperature and marker colour for the reference cities
    Climate,

    /// Ask the chat model for an agronomy analysis of a location
    Analyze {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,

        /// Model name sent in the completion request
        #[arg(short, long)]
        model: Option<String>,

        /// Chat endpoint (defaults to the local relay)
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Ask the space-tech assistant a free-text question
    Ask {
        /// Question or topic
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Model name sent in the completion request
        #[arg(short, long)]
        model: Option<String>,

        /// Chat endpoint (defaults to the local relay)
        #[arg(short, long)]
        endpoint: Option<String>,
    },
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_stderr_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn init_file_logging(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = File::create(path)?;
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn default_log_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("globe-events")
        .join("simulate.log")
}

fn chat_client(settings: &Settings, model: Option<String>, endpoint: Option<String>) -> Option<ChatClient> {
    let model = model.or_else(|| settings.analysis.model.clone())?;
    let endpoint = endpoint.unwrap_or_else(|| settings.analysis_endpoint());
    Some(ChatClient::new(endpoint, model, settings.analysis.api_key.clone()))
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let settings = Settings::load();

    match cli.command {
        Commands::Relay { host, port, upstream } => {
            init_stderr_logging();
            let mut config = settings.relay_config();
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(upstream) = upstream {
                config.upstream_url = upstream;
            }

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(relay::serve(config))?;
        }
        Commands::Simulate {
            body,
            mode,
            policy,
            seed,
            time,
            log,
            headless,
        } => {
            let mut config = settings.simulate_config();
            if let Some(body) = body {
                config.body = body;
            }
            if let Some(policy) = policy {
                config.stop_policy = policy;
            }
            config.seed = seed.or(config.seed);
            config.mode = mode;
            config.time_step = time.clamp(0.005, 1.0);
            config.log_file = log;

            match headless {
                Some(duration_ms) => {
                    init_stderr_logging();
                    run_headless(&config, duration_ms);
                }
                None => {
                    let log_path = config.log_file.clone().unwrap_or_else(default_log_path);
                    init_file_logging(&log_path)?;
                    info!(path = %log_path.display(), "logging to file");

                    let mut ctx = new_context(&config);
                    let weather = settings.weather_client();
                    let chat = chat_client(&settings, None, None);
                    let mut term = Terminal::new(true)?;
                    view::run(&mut term, &mut ctx, &config, weather, chat)?;
                }
            }
        }
        Commands::Project { lat, lon, body } => {
            let p = forward(GeoPoint::new(lat, lon), body.radius());
            println!("{:.6} {:.6} {:.6}", p.x, p.y, p.z);
        }
        Commands::Unproject { x, y, z, body } => {
            let g = inverse(CartesianPoint::new(x, y, z), body.radius());
            println!("{}", g);
        }
        Commands::Climate => {
            init_stderr_logging();
            let weather = settings.weather_client();
            let readings = weather.station_readings();
            for reading in &readings {
                let color = analysis::temperature_color(reading.temperature_c);
                println!(
                    "{:<10} {:>6.1}C  #{:06x}",
                    reading.name, reading.temperature_c, color.0
                );
            }
            if readings.len() < CLIMATE_STATIONS.len() {
                eprintln!(
                    "{} of {} stations unavailable",
                    CLIMATE_STATIONS.len() - readings.len(),
                    CLIMATE_STATIONS.len()
                );
            }
        }
        Commands::Analyze {
            lat,
            lon,
            model,
            endpoint,
        } => {
            init_stderr_logging();
            let client = chat_client(&settings, model, endpoint)
                .ok_or("no model configured: pass --model or set [analysis] model")?;
            let report = client.analyze_area(GeoPoint::new(lat, lon))?;

            println!("soil:      {}", report.soil_type);
            println!("elevation: {} m", report.elevation);
            println!("temp:      {} C", report.temp_c);
            println!("wind:      {} kph", report.wind_kph);
            for crop in &report.crops {
                println!("  {:<16} {:<10} {:>3}%", crop.name, crop.season, crop.match_score);
            }
            println!("{}", report.analysis_brief);
        }
        Commands::Ask {
            query,
            model,
            endpoint,
        } => {
            init_stderr_logging();
            let client = chat_client(&settings, model, endpoint)
                .ok_or("no model configured: pass --model or set [analysis] model")?;
            println!("{}", client.ask_topic(&query.join(" "))?);
        }
    }

    Ok(())
}

fn new_context(config: &SimulateConfig) -> GlobeContext {
    let simulator = EventSimulator::new(config.simulator, config.stop_policy, config.seed);
    GlobeContext::new(Box::new(MemoryBackend::new()), config.body, simulator)
}

/// Drive the context on the virtual clock only, in 100ms steps
fn run_headless(config: &SimulateConfig, duration_ms: u64) {
    let mut ctx = new_context(config);
    ctx.switch_mode(config.mode);

    let mut elapsed = 0;
    while elapsed < duration_ms {
        let step = (duration_ms - elapsed).min(100);
        ctx.advance(step);
        elapsed += step;
    }

    println!(
        "mode {} | body {} | {} ms | cycles {} | entities {}",
        ctx.mode().name(),
        ctx.body().name(),
        ctx.now_ms(),
        ctx.simulation_cycles(),
        ctx.group().len()
    );
}

//! Terminal globe: draws the entity group onto a rotating braille sphere
//!
//! The view owns nothing but a camera and a dot canvas. Entities come from
//! the context's group every frame, so whatever the scheduler disposed is
//! simply gone on the next frame.

use crate::analysis::{AirQuality, AreaAnalysis, ChatClient, StationReading, WeatherClient};
use crate::config::SimulateConfig;
use crate::context::{DisplayMode, GlobeContext};
use crate::error::AnalysisError;
use crate::projection::{forward, CartesianPoint, GeoPoint};
use crate::scene::{EntityKind, Rgb};
use crate::scheduler::Scheduled;
use crate::terminal::{rgb, Terminal};
use crossterm::event::{Event, KeyCode, MouseButton, MouseEventKind};
use crossterm::style::Color;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const GRID: Rgb = Rgb(0x30363d);
const MIN_ZOOM: f64 = 0.3;
const MAX_ZOOM: f64 = 3.0;

/// Orientation of the globe on screen
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub rotation: f64, // Radians about the polar axis
    pub tilt: f64,     // Radians, positive shows more of the north
    pub zoom: f64,
}

/// Screen placement: centre and sphere radius, in braille dots
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub cx: f64,
    pub cy: f64,
    pub scale: f64,
}

impl Viewport {
    /// Fit the sphere into a `width` x `height` cell terminal. Braille cells
    /// are 2x4 dots and terminal cells about twice as tall as wide, so dots
    /// come out roughly square.
    pub fn fit(width: u16, height: u16, zoom: f64) -> Self {
        let dots_w = width as f64 * 2.0;
        let dots_h = height as f64 * 4.0;
        Self {
            cx: dots_w / 2.0,
            cy: dots_h / 2.0,
            scale: dots_w.min(dots_h) * 0.4 * zoom,
        }
    }
}

impl Camera {
    pub fn new(tilt: f64) -> Self {
        Self {
            rotation: 0.0,
            tilt,
            zoom: 1.0,
        }
    }

    /// Model space -> camera space for a unit sphere. The camera looks down
    /// -z; +z faces the viewer.
    fn to_camera(&self, p: CartesianPoint, radius: f64) -> (f64, f64, f64) {
        let (x, y, z) = (p.x / radius, p.y / radius, p.z / radius);
        let (sa, ca) = self.rotation.sin_cos();
        let (st, ct) = self.tilt.sin_cos();

        let x1 = x * ca + z * sa;
        let z1 = -x * sa + z * ca;

        let y2 = y * ct - z1 * st;
        let z2 = y * st + z1 * ct;
        (x1, y2, z2)
    }

    /// Braille dot under a model-space point, or `None` when the point is
    /// behind the globe.
    pub fn project(&self, p: CartesianPoint, radius: f64, view: &Viewport) -> Option<(i32, i32)> {
        let (x, y, z) = self.to_camera(p, radius);
        // Points lifted off the surface stay visible a little past the limb
        let lift = (x * x + y * y + z * z).sqrt();
        if z < -((lift - 1.0).max(0.0)) - 0.02 {
            return None;
        }
        Some((
            (view.cx + x * view.scale).round() as i32,
            (view.cy - y * view.scale).round() as i32,
        ))
    }

    /// The point on the sphere under braille dot (`bx`, `by`), if the dot
    /// is on the disc.
    pub fn unproject(&self, bx: f64, by: f64, radius: f64, view: &Viewport) -> Option<CartesianPoint> {
        if view.scale <= 0.0 {
            return None;
        }
        let u = (bx - view.cx) / view.scale;
        let v = (view.cy - by) / view.scale;
        let d = u * u + v * v;
        if d > 1.0 {
            return None;
        }
        let w = (1.0 - d).sqrt();

        let (sa, ca) = self.rotation.sin_cos();
        let (st, ct) = self.tilt.sin_cos();

        let y = v * ct + w * st;
        let z1 = -v * st + w * ct;

        let x = u * ca - z1 * sa;
        let z = u * sa + z1 * ca;
        Some(CartesianPoint::new(x * radius, y * radius, z * radius))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Ink {
    color: Rgb,
    priority: u8,
}

/// Braille dot buffer; each dot keeps the highest-priority ink drawn on it.
pub struct BrailleCanvas {
    width: usize,
    height: usize,
    dots: Vec<Option<Ink>>,
}

impl BrailleCanvas {
    /// Canvas for a `cols` x `rows` cell terminal
    pub fn new(cols: u16, rows: u16) -> Self {
        let width = cols as usize * 2;
        let height = rows as usize * 4;
        Self {
            width,
            height,
            dots: vec![None; width * height],
        }
    }

    pub fn clear(&mut self) {
        self.dots.iter_mut().for_each(|d| *d = None);
    }

    pub fn plot(&mut self, x: i32, y: i32, color: Rgb, priority: u8) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let slot = &mut self.dots[y as usize * self.width + x as usize];
        if slot.map_or(true, |ink| ink.priority <= priority) {
            *slot = Some(Ink { color, priority });
        }
    }

    /// Glyph and colour for one terminal cell
    pub fn cell(&self, col: usize, row: usize) -> Option<(char, Rgb)> {
        const BITS: [(usize, usize, u8); 8] = [
            (0, 0, 0x01),
            (0, 1, 0x02),
            (0, 2, 0x04),
            (1, 0, 0x08),
            (1, 1, 0x10),
            (1, 2, 0x20),
            (0, 3, 0x40),
            (1, 3, 0x80),
        ];

        let mut bits = 0u8;
        let mut top: Option<Ink> = None;
        for (dx, dy, bit) in BITS {
            let (x, y) = (col * 2 + dx, row * 4 + dy);
            if x >= self.width || y >= self.height {
                continue;
            }
            if let Some(ink) = self.dots[y * self.width + x] {
                bits |= bit;
                if top.map_or(true, |t| ink.priority > t.priority) {
                    top = Some(ink);
                }
            }
        }

        let ink = top?;
        Some((char::from_u32(0x2800 + bits as u32).unwrap_or(' '), ink.color))
    }
}

/// Results of work done off the render thread
enum Reply {
    Stations(u64, Vec<StationReading>),
    Analysis(GeoPoint, Result<AreaAnalysis, AnalysisError>),
    AirQuality(GeoPoint, Result<AirQuality, AnalysisError>),
}

/// Numbers each fetch; only the reply to the latest one is applied.
#[derive(Debug, Default)]
struct FetchGenerations {
    latest: u64,
}

impl FetchGenerations {
    fn begin(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.latest
    }
}

/// Runs network calls on worker threads and hands results back to the
/// render loop.
struct Dispatcher {
    weather: Arc<WeatherClient>,
    chat: Option<Arc<ChatClient>>,
    stations: FetchGenerations,
    tx: Sender<Reply>,
    rx: Receiver<Reply>,
}

impl Dispatcher {
    fn new(weather: WeatherClient, chat: Option<ChatClient>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            weather: Arc::new(weather),
            chat: chat.map(Arc::new),
            stations: FetchGenerations::default(),
            tx,
            rx,
        }
    }

    fn fetch_stations(&mut self) {
        let generation = self.stations.begin();
        let weather = self.weather.clone();
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send(Reply::Stations(generation, weather.station_readings()));
        });
    }

    fn fetch_air_quality(&self, point: GeoPoint) {
        let weather = self.weather.clone();
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send(Reply::AirQuality(point, weather.air_quality(point)));
        });
    }

    /// Returns false when no chat endpoint is configured
    fn analyze(&self, point: GeoPoint) -> bool {
        let Some(chat) = self.chat.clone() else {
            return false;
        };
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send(Reply::Analysis(point, chat.analyze_area(point)));
        });
        true
    }
}

/// Converts frame times to whole virtual milliseconds, carrying the
/// sub-millisecond remainder into the next frame.
#[derive(Debug, Default)]
struct FrameClock {
    carry_ns: u128,
}

impl FrameClock {
    fn tick(&mut self, elapsed: Duration) -> u64 {
        let total = self.carry_ns + elapsed.as_nanos();
        self.carry_ns = total % 1_000_000;
        (total / 1_000_000) as u64
    }
}

/// Run the interactive globe until the user quits
pub fn run(
    term: &mut Terminal,
    ctx: &mut GlobeContext,
    config: &SimulateConfig,
    weather: WeatherClient,
    chat: Option<ChatClient>,
) -> io::Result<()> {
    let mut dispatcher = Dispatcher::new(weather, chat);
    let mut camera = Camera::new(config.tilt as f64);
    let (w, h) = term.size();
    let mut canvas = BrailleCanvas::new(w, h);
    let mut paused = false;
    let mut status = String::new();

    enter_mode(ctx, config.mode, &mut dispatcher, &mut status);
    let mut clock = FrameClock::default();
    let mut last = Instant::now();

    loop {
        if term.refresh_size()? {
            let (w, h) = term.size();
            canvas = BrailleCanvas::new(w, h);
        }
        let (width, height) = term.size();
        let viewport = Viewport::fit(width, height.saturating_sub(2), camera.zoom);

        while let Some(event) = term.next_event()? {
            match event {
                Event::Key(key) => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char(' ') => paused = !paused,
                    KeyCode::Char('m') => {
                        let next = ctx.mode().next();
                        enter_mode(ctx, next, &mut dispatcher, &mut status);
                    }
                    KeyCode::Char('c') => {
                        let next = if ctx.mode() == DisplayMode::Cyber {
                            DisplayMode::Home
                        } else {
                            DisplayMode::Cyber
                        };
                        enter_mode(ctx, next, &mut dispatcher, &mut status);
                    }
                    KeyCode::Char('b') => {
                        let body = ctx.body().next();
                        ctx.change_body(body);
                        if ctx.mode().profile().fetches_stations {
                            dispatcher.fetch_stations();
                        }
                    }
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        camera.zoom = (camera.zoom * 1.2).min(MAX_ZOOM);
                    }
                    KeyCode::Char('-') | KeyCode::Char('_') => {
                        camera.zoom = (camera.zoom / 1.2).max(MIN_ZOOM);
                    }
                    KeyCode::Left | KeyCode::Char('h') => camera.rotation += 0.1,
                    KeyCode::Right | KeyCode::Char('l') => camera.rotation -= 0.1,
                    KeyCode::Up | KeyCode::Char('k') => {
                        camera.tilt = (camera.tilt + 0.05).min(std::f64::consts::FRAC_PI_2);
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        camera.tilt = (camera.tilt - 0.05).max(-std::f64::consts::FRAC_PI_2);
                    }
                    _ => {}
                },
                Event::Mouse(mouse) if mouse.kind == MouseEventKind::Down(MouseButton::Left) => {
                    // Aim at the middle of the clicked cell
                    let bx = mouse.column as f64 * 2.0 + 1.0;
                    let by = mouse.row.saturating_sub(1) as f64 * 4.0 + 2.0;
                    let radius = ctx.radius().get();
                    if let Some(hit) = camera.unproject(bx, by, radius, &viewport) {
                        let (point, _) = ctx.handle_hit(hit);
                        status = format!("hit {}", point);
                        if ctx.mode().profile().analyzes_clicks {
                            dispatcher.fetch_air_quality(point);
                            if dispatcher.analyze(point) {
                                status.push_str("  analyzing...");
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        while let Ok(reply) = dispatcher.rx.try_recv() {
            match reply {
                Reply::Stations(generation, readings)
                    if dispatcher.stations.is_current(generation)
                        && ctx.mode().profile().fetches_stations =>
                {
                    let placed = ctx.place_station_markers(&readings);
                    status = format!("{} stations", placed.len());
                }
                Reply::Stations(generation, _) => {
                    debug!(generation, "dropping stale station readings");
                }
                Reply::AirQuality(point, Ok(air)) => {
                    info!(%point, %air, "air quality");
                    status = format!("{}  {}", point, air);
                }
                Reply::AirQuality(point, Err(e)) => {
                    warn!(%point, error = %e, "air quality lookup failed");
                }
                Reply::Analysis(point, Ok(analysis)) => {
                    info!(%point, soil = %analysis.soil_type, "area analysis");
                    status = format!("{}: {}", analysis.soil_type, analysis.analysis_brief);
                }
                Reply::Analysis(point, Err(e)) => {
                    warn!(%point, error = %e, "area analysis failed");
                    status = format!("analysis failed: {}", e);
                }
            }
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last);
        last = now;

        if !paused {
            ctx.advance(clock.tick(elapsed));
            if ctx.mode().profile().auto_rotate {
                camera.rotation += config.rotation_speed as f64 * elapsed.as_secs_f64();
            }
        }

        draw_globe(&mut canvas, ctx, &camera, &viewport);

        term.clear();
        for row in 0..height.saturating_sub(2) as usize {
            for col in 0..width as usize {
                if let Some((ch, color)) = canvas.cell(col, row) {
                    term.set(col as i32, row as i32 + 1, ch, Some(to_color(color)), false);
                }
            }
        }
        draw_hud(term, ctx, paused, &status);
        term.render()?;
        term.sleep(config.time_step);
    }
}

fn enter_mode(ctx: &mut GlobeContext, mode: DisplayMode, dispatcher: &mut Dispatcher, status: &mut String) {
    ctx.switch_mode(mode);
    status.clear();
    if mode.profile().fetches_stations {
        dispatcher.fetch_stations();
        status.push_str("fetching weather...");
    }
}

fn draw_globe(canvas: &mut BrailleCanvas, ctx: &GlobeContext, camera: &Camera, view: &Viewport) {
    canvas.clear();
    let body = ctx.body();
    let radius = ctx.radius();
    let r = radius.get();

    // Graticule every 30 degrees
    for lat in (-60..=60).step_by(30) {
        for lon in -180..180 {
            let p = forward(GeoPoint::new(lat as f64, lon as f64), radius);
            if let Some((x, y)) = camera.project(p, r, view) {
                canvas.plot(x, y, GRID, 1);
            }
        }
    }
    for lon in (-180..180).step_by(30) {
        for lat in -90..=90 {
            let p = forward(GeoPoint::new(lat as f64, lon as f64), radius);
            if let Some((x, y)) = camera.project(p, r, view) {
                canvas.plot(x, y, GRID, 1);
            }
        }
    }

    // Limb, brighter for bodies with an atmosphere
    let limb = if body.has_atmosphere() { body.accent() } else { GRID };
    for step in 0..720 {
        let a = (step as f64 / 720.0) * std::f64::consts::TAU;
        let x = view.cx + a.cos() * view.scale;
        let y = view.cy + a.sin() * view.scale;
        canvas.plot(x as i32, y as i32, limb, 2);
    }

    let now = ctx.now_ms();
    for entity in ctx.group().iter() {
        match entity.kind {
            EntityKind::Marker => {
                if let Some(&p) = entity.points.first() {
                    if let Some((x, y)) = camera.project(p, r, view) {
                        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1), (-1, 0), (0, -1)] {
                            canvas.plot(x + dx, y + dy, entity.color, 4);
                        }
                    }
                }
            }
            EntityKind::Arc => {
                // Reveal the path over the first half of its lifetime
                if entity.points.is_empty() {
                    continue;
                }
                let shown = match entity.ttl_ms {
                    Some(ttl) if ttl > 0 => {
                        let age = now.saturating_sub(entity.created_at_ms) as f64;
                        ((age / (ttl as f64 / 2.0)).min(1.0) * entity.points.len() as f64).ceil() as usize
                    }
                    _ => entity.points.len(),
                };
                for pair in entity.points[..shown.clamp(1, entity.points.len())].windows(2) {
                    for t in 0..8 {
                        let f = t as f64 / 8.0;
                        let p = CartesianPoint::new(
                            pair[0].x + (pair[1].x - pair[0].x) * f,
                            pair[0].y + (pair[1].y - pair[0].y) * f,
                            pair[0].z + (pair[1].z - pair[0].z) * f,
                        );
                        if let Some((x, y)) = camera.project(p, r, view) {
                            canvas.plot(x, y, entity.color, 3);
                        }
                    }
                }
            }
        }
    }
}

fn draw_hud(term: &mut Terminal, ctx: &GlobeContext, paused: bool, status: &str) {
    let (width, height) = term.size();
    let title = format!(
        " globe-events | {} | {} | sim {:?} | cycles {} | entities {} | t {:.1}s{}",
        ctx.mode().name(),
        ctx.body().name(),
        ctx.simulator_state(),
        ctx.simulation_cycles(),
        ctx.group().len(),
        ctx.now_ms() as f64 / 1000.0,
        if paused { " | PAUSED" } else { "" },
    );
    term.set_str(0, 0, &title, Some(to_color(ctx.body().accent())), true);

    let help = " q quit  space pause  m mode  c cyber  b body  +/- zoom  arrows turn  click mark";
    let footer = if status.is_empty() {
        help.to_string()
    } else {
        format!(" {}", status)
    };
    let footer: String = footer.chars().take(width as usize).collect();
    term.set_str(0, height as i32 - 1, &footer, Some(Color::Grey), false);
}

fn to_color(c: Rgb) -> Color {
    rgb(c.r(), c.g(), c.b())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{inverse, SphereRadius};

    fn view() -> Viewport {
        Viewport::fit(80, 40, 1.0)
    }

    #[test]
    fn facing_point_projects_to_centre() {
        // lon -90 sits on +z, which faces the camera at rotation 0
        let camera = Camera::new(0.0);
        let p = forward(GeoPoint::new(0.0, -90.0), SphereRadius::new(5.0).unwrap());
        let (x, y) = camera.project(p, 5.0, &view()).unwrap();
        assert_eq!((x, y), (80, 80));
    }

    #[test]
    fn far_side_is_hidden() {
        let camera = Camera::new(0.0);
        let p = forward(GeoPoint::new(0.0, 90.0), SphereRadius::new(5.0).unwrap());
        assert!(camera.project(p, 5.0, &view()).is_none());
    }

    #[test]
    fn lifted_points_show_past_the_limb() {
        let camera = Camera::new(0.0);
        // Just behind the limb but lifted like a marker
        let p = CartesianPoint::new(5.25, 0.0, -0.1);
        assert!(camera.project(p, 5.0, &view()).is_some());
        assert!(camera.project(CartesianPoint::new(5.0, 0.0, -0.5), 5.0, &view()).is_none());
    }

    #[test]
    fn unproject_inverts_project() {
        let camera = Camera {
            rotation: 0.7,
            tilt: 0.35,
            zoom: 1.0,
        };
        let radius = SphereRadius::new(5.0).unwrap();
        let v = view();
        let geo = GeoPoint::new(20.0, -60.0);
        let p = forward(geo, radius);
        let (bx, by) = camera.project(p, 5.0, &v).unwrap();

        let hit = camera.unproject(bx as f64, by as f64, 5.0, &v).unwrap();
        let back = inverse(hit, radius);
        // One dot is a few degrees at this size
        assert!((back.lat() - 20.0).abs() < 3.0, "{back:?}");
        assert!((back.lon() + 60.0).abs() < 3.0, "{back:?}");
    }

    #[test]
    fn click_off_the_disc_misses() {
        let camera = Camera::new(0.0);
        assert!(camera.unproject(0.0, 0.0, 5.0, &view()).is_none());
    }

    #[test]
    fn squashed_terminal_has_no_disc_to_hit() {
        let v = Viewport::fit(80, 0, 1.0);
        assert_eq!(v.scale, 0.0);
        assert!(Camera::new(0.3).unproject(v.cx, v.cy, 5.0, &v).is_none());
    }

    #[test]
    fn only_the_latest_station_fetch_counts() {
        let mut fetches = FetchGenerations::default();
        let first = fetches.begin();
        let second = fetches.begin();
        assert!(!fetches.is_current(first));
        assert!(fetches.is_current(second));
    }

    #[test]
    fn frame_clock_keeps_sub_millisecond_remainders() {
        let mut clock = FrameClock::default();
        let ticks: Vec<u64> = (0..3).map(|_| clock.tick(Duration::from_micros(1_500))).collect();
        assert_eq!(ticks, [1, 2, 1]);

        let mut clock = FrameClock::default();
        let total: u64 = (0..1_000).map(|_| clock.tick(Duration::from_micros(50_999))).sum();
        assert_eq!(total, 50_999);
    }

    #[test]
    fn braille_bits_and_priority() {
        let mut canvas = BrailleCanvas::new(2, 1);
        canvas.plot(0, 0, GRID, 1);
        canvas.plot(1, 3, Rgb(0xff0000), 4);
        canvas.plot(1, 3, GRID, 1);

        let (ch, color) = canvas.cell(0, 0).unwrap();
        assert_eq!(ch, '\u{2881}');
        assert_eq!(color, Rgb(0xff0000));
        assert!(canvas.cell(1, 0).is_none());

        canvas.plot(-1, 0, GRID, 9);
        canvas.plot(4, 0, GRID, 9);
        canvas.clear();
        assert!(canvas.cell(0, 0).is_none());
    }
}

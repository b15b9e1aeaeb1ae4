//! Sandbox modules.
//!
//! A small game world wired through the framework: a database that connects
//! before anything else, zones created at boot, chat relayed from clients,
//! region and meta watchers, a heartbeat timer and a ready announcement. The
//! `--simulate` flag drives scripted traffic through it.

use crate::config::AppConfig;
use anyhow::Result;
use keystone_event_system::{
    BoundingRegion, ColShapeRef, EntityKind, EntityRef, EventArgs, EventMethod, EventService,
    HandlerError, LocalPlatform, MatchOptions, OutboundMessage, Platform, TransportChannel,
    Vector3,
};
use keystone_loader::{App, BootMethod, Bucket, Module, ModuleBinder};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const DB_CONNECT_DELAY: Duration = Duration::from_millis(50);
const DB_POLL_INTERVAL: Duration = Duration::from_millis(10);
const LOW_FUEL: f64 = 10.0;

// ============================================================================
// Components
// ============================================================================

/// Player records, available once `connect` has completed.
#[derive(Default)]
pub struct Database {
    connected: AtomicBool,
    players: Mutex<HashMap<u32, String>>,
}

impl Database {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn record_player(&self, player: EntityRef, name: &str) -> Result<(), HandlerError> {
        if !self.is_connected() {
            return Err(HandlerError::execution("database not connected"));
        }
        if let Ok(mut players) = self.players.lock() {
            players.insert(player.id, name.to_string());
        }
        Ok(())
    }

    pub fn player_name(&self, player: EntityRef) -> Option<String> {
        self.players
            .lock()
            .ok()
            .and_then(|players| players.get(&player.id).cloned())
    }
}

#[derive(Default)]
pub struct ServerStats {
    ticks: AtomicU64,
    connections: AtomicU64,
}

impl ServerStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

struct Heartbeat {
    period: Duration,
}

struct Announcer {
    server_name: String,
    events: EventService,
}

struct ConnectionLogger {
    label: &'static str,
}

struct ZoneService {
    platform: Arc<LocalPlatform>,
    shapes: Mutex<Vec<Arc<ColShapeRef>>>,
}

struct ZoneWatcher {
    events: EventService,
}

struct GarageAttendant;

struct FuelMonitor;

struct ChatService {
    events: EventService,
    history: Mutex<Vec<String>>,
}

// ============================================================================
// Modules
// ============================================================================

/// Database, statistics, heartbeat and announcements. Imported by every other
/// sandbox module.
#[derive(Clone)]
pub struct CoreModule {
    server_name: String,
    tick_interval: Duration,
}

impl CoreModule {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            server_name: config.server.name.clone(),
            tick_interval: Duration::from_millis(config.server.tick_interval_ms),
        }
    }
}

impl Module for CoreModule {
    fn name(&self) -> &str {
        "core"
    }

    fn configure(&self, binder: &mut ModuleBinder<'_>) {
        let events = binder.events();
        let server_name = self.server_name.clone();

        binder
            .singleton("Database", |_| Ok(Database::default()))
            .value("ServerStats", ServerStats::default())
            .singleton("Announcer", move |_| {
                Ok(Announcer {
                    server_name: server_name.clone(),
                    events: events.clone(),
                })
            })
            .instance("ConnectionLogger", Arc::new(ConnectionLogger { label: "audit" }))
            .instance("ConnectionLogger", Arc::new(ConnectionLogger { label: "metrics" }));

        binder.boot(
            Bucket::Before,
            "Database",
            BootMethod::with_completion("connect", |db: Arc<Database>, done| {
                tokio::spawn(async move {
                    tokio::time::sleep(DB_CONNECT_DELAY).await;
                    db.connected.store(true, Ordering::SeqCst);
                    info!("🗄️ Database connected");
                    done.done();
                });
            }),
            Some(DB_POLL_INTERVAL),
        );

        binder
            .on_server(
                "ConnectionLogger",
                "playerConnect",
                EventMethod::sync("onPlayerConnect", |logger: &ConnectionLogger, payload| {
                    let name: String = payload.args()?.get(0)?;
                    debug!("[{}] player connecting: {}", logger.label, name);
                    Ok(())
                }),
            )
            .on_server(
                "ServerStats",
                "playerConnect",
                EventMethod::sync("countConnection", |stats: &ServerStats, _| {
                    stats.connections.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .on(
                "ServerStats",
                "server:tick",
                EventMethod::sync("onTick", |stats: &ServerStats, _| {
                    stats.ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .once_client(
                "Announcer",
                "client:ready",
                EventMethod::sync("onFirstClient", |announcer: &Announcer, payload| {
                    let player = payload.args()?.source();
                    info!(
                        "🎉 First client ready on {}: {:?}",
                        announcer.server_name, player
                    );
                    Ok(())
                }),
            )
            .after_bootstrap(
                "Announcer",
                BootMethod::new("announce", |announcer: Arc<Announcer>| async move {
                    announcer
                        .events
                        .emit_all_clients(
                            "server:ready",
                            EventArgs::new(vec![json!(announcer.server_name)]),
                        )
                        .await;
                    info!("📣 {} is ready", announcer.server_name);
                    Ok(())
                }),
            );

        if !self.tick_interval.is_zero() {
            let context = binder.context().clone();
            binder.value(
                "Heartbeat",
                Heartbeat {
                    period: self.tick_interval,
                },
            );
            binder.after(
                "Heartbeat",
                BootMethod::new("start", move |heartbeat: Arc<Heartbeat>| {
                    let context = context.clone();
                    async move {
                        let events = context.events().clone();
                        context.timers().set_interval(heartbeat.period, move || {
                            let events = events.clone();
                            async move {
                                events.emit("server:tick", EventArgs::empty()).await;
                            }
                        });
                        info!("💓 Heartbeat every {:?}", heartbeat.period);
                        Ok(())
                    }
                }),
            );
        }
    }
}

/// Zones, region watchers and vehicle meta monitoring.
pub struct WorldModule {
    core: CoreModule,
    platform: Arc<LocalPlatform>,
}

impl WorldModule {
    pub fn new(core: CoreModule, platform: Arc<LocalPlatform>) -> Self {
        Self { core, platform }
    }
}

impl Module for WorldModule {
    fn name(&self) -> &str {
        "world"
    }

    fn imports(&self) -> Vec<Box<dyn Module>> {
        vec![Box::new(self.core.clone())]
    }

    fn configure(&self, binder: &mut ModuleBinder<'_>) {
        let events = binder.events();
        binder
            .value(
                "ZoneService",
                ZoneService {
                    platform: self.platform.clone(),
                    shapes: Mutex::new(Vec::new()),
                },
            )
            .value("ZoneWatcher", ZoneWatcher { events })
            .value("GarageAttendant", GarageAttendant)
            .value("FuelMonitor", FuelMonitor);

        binder
            .before("ZoneService", BootMethod::sync("createZones", create_zones))
            .on_enter_region(
                "ZoneWatcher",
                MatchOptions::region("spawn").for_entity(EntityKind::Player),
                EventMethod::new("onEnterSpawn", |watcher: Arc<ZoneWatcher>, payload| async move {
                    let (shape, player) = payload.region()?;
                    let zone = shape.name.clone().unwrap_or_default();
                    info!("🚪 {} entered spawn zone {}", player, zone);
                    watcher
                        .events
                        .emit_client(player, "zone:entered", EventArgs::new(vec![json!(zone)]))
                        .await;
                    Ok(())
                }),
            )
            .on_leave_region(
                "ZoneWatcher",
                MatchOptions::region("safezone"),
                EventMethod::sync("onLeaveSafezone", |_: &ZoneWatcher, payload| {
                    let (shape, entity) = payload.region()?;
                    info!("🛡️ {} left safe zone {:?}", entity, shape.name);
                    Ok(())
                }),
            )
            .on_enter_region(
                "GarageAttendant",
                MatchOptions::region("garage")
                    .named("central")
                    .for_entity(EntityKind::Vehicle),
                EventMethod::sync("onVehicleParked", |_: &GarageAttendant, payload| {
                    let (_, vehicle) = payload.region()?;
                    info!("🅿️ {} parked in the central garage", vehicle);
                    Ok(())
                }),
            )
            .on_meta_change(
                "FuelMonitor",
                MatchOptions::meta(EntityKind::Vehicle).with_key("fuel"),
                EventMethod::sync("onFuelChange", |_: &FuelMonitor, payload| {
                    let change = payload.meta_change()?;
                    let fuel = change.value.as_f64().ok_or_else(|| {
                        HandlerError::InvalidPayload(format!("fuel is not a number: {}", change.value))
                    })?;
                    if fuel < LOW_FUEL {
                        warn!("⛽ {} is low on fuel ({})", change.entity, fuel);
                    }
                    Ok(())
                }),
            )
            .on_stream_meta_change(
                "FuelMonitor",
                MatchOptions::meta(EntityKind::Vehicle).with_key("siren"),
                EventMethod::sync("onSiren", |_: &FuelMonitor, payload| {
                    let change = payload.meta_change()?;
                    debug!("🚨 {} siren: {} -> {}", change.entity, change.old_value, change.value);
                    Ok(())
                }),
            );
    }
}

fn create_zones(zones: &ZoneService) -> Result<(), HandlerError> {
    let definitions = [
        (
            "spawn",
            "plaza",
            BoundingRegion::Sphere {
                center: Vector3::new(0.0, 0.0, 0.0),
                radius: 25.0,
            },
        ),
        (
            "garage",
            "central",
            BoundingRegion::Cuboid {
                min: Vector3::new(100.0, 0.0, -5.0),
                max: Vector3::new(120.0, 20.0, 5.0),
            },
        ),
        (
            "safezone",
            "hospital",
            BoundingRegion::Cylinder {
                base: Vector3::new(-50.0, -50.0, 0.0),
                radius: 15.0,
                height: 30.0,
            },
        ),
    ];

    let mut shapes = zones
        .shapes
        .lock()
        .map_err(|_| HandlerError::execution("zone table poisoned"))?;
    for (shape_type, name, region) in definitions {
        shapes.push(zones.platform.create_col_shape(shape_type, Some(name), region));
    }
    info!("🗺️ Created {} zones", shapes.len());
    Ok(())
}

/// Client chat relayed to every player.
pub struct ChatModule {
    core: CoreModule,
}

impl ChatModule {
    pub fn new(core: CoreModule) -> Self {
        Self { core }
    }
}

impl Module for ChatModule {
    fn name(&self) -> &str {
        "chat"
    }

    fn imports(&self) -> Vec<Box<dyn Module>> {
        vec![Box::new(self.core.clone())]
    }

    fn configure(&self, binder: &mut ModuleBinder<'_>) {
        let events = binder.events();
        binder
            .value(
                "ChatService",
                ChatService {
                    events,
                    history: Mutex::new(Vec::new()),
                },
            )
            .on_client(
                "ChatService",
                "chat:say",
                EventMethod::new("onSay", |chat: Arc<ChatService>, payload| async move {
                    let args = payload.args()?;
                    let sender = args
                        .source()
                        .ok_or_else(|| HandlerError::InvalidPayload("chat without a sender".into()))?;
                    let text: String = args.get(0)?;
                    if text.trim().is_empty() {
                        return Err(HandlerError::InvalidPayload("empty chat message".into()));
                    }

                    if let Ok(mut history) = chat.history.lock() {
                        history.push(format!("{}: {}", sender, text));
                    }
                    chat.events
                        .emit_all_clients(
                            "chat:message",
                            EventArgs::new(vec![json!(sender.id), json!(text)]),
                        )
                        .await;
                    Ok(())
                }),
            )
            .on_server(
                "Database",
                "playerRegistered",
                EventMethod::sync("onPlayerRegistered", |db: &Database, payload| {
                    let args = payload.args()?;
                    let id: u32 = args.get(0)?;
                    let name: String = args.get(1)?;
                    db.record_player(EntityRef::new(id, EntityKind::Player), &name)
                }),
            );
    }
}

/// Assembles the sandbox application.
pub fn build_app(platform: Arc<LocalPlatform>, config: &AppConfig) -> App {
    let core = CoreModule::new(config);
    App::builder(platform.clone())
        .with_config(config.boot.clone())
        .module(core.clone())
        .module(WorldModule::new(core.clone(), platform))
        .module(ChatModule::new(core))
        .build()
}

// ============================================================================
// Simulation
// ============================================================================

/// What a scripted run produced.
#[derive(Debug)]
pub struct SimulationSummary {
    pub outbound: Vec<OutboundMessage>,
    pub events_dispatched: u64,
    pub handler_failures: u64,
}

/// Drives a short scripted session through a booted sandbox app.
pub async fn simulate(app: &App, platform: &LocalPlatform) -> Result<SimulationSummary> {
    info!("🎬 Running scripted sandbox traffic");

    platform
        .emit(
            TransportChannel::Server,
            "playerConnect",
            EventArgs::new(vec![json!("alice")]).into(),
        )
        .await;
    let alice = platform
        .spawn_entity(EntityKind::Player, Vector3::new(200.0, 0.0, 0.0))
        .await;
    platform
        .emit(
            TransportChannel::Server,
            "playerRegistered",
            EventArgs::new(vec![json!(alice.id), json!("alice")]).into(),
        )
        .await;

    for _ in 0..2 {
        platform
            .emit(
                TransportChannel::Client,
                "client:ready",
                EventArgs::from_player(alice, Vec::new()).into(),
            )
            .await;
    }

    platform.set_position(alice, Vector3::new(5.0, 5.0, 0.0)).await;
    platform
        .emit(
            TransportChannel::Client,
            "chat:say",
            EventArgs::from_player(alice, vec![json!("hello world")]).into(),
        )
        .await;
    // Rejected by the handler, logged, and nothing is relayed
    platform
        .emit(
            TransportChannel::Client,
            "chat:say",
            EventArgs::from_player(alice, vec![json!("   ")]).into(),
        )
        .await;

    let car = platform
        .spawn_entity(EntityKind::Vehicle, Vector3::new(110.0, 10.0, 0.0))
        .await;
    platform.set_synced_meta(car, "fuel", json!(42.0)).await;
    platform.set_synced_meta(car, "fuel", json!(6.5)).await;
    platform.set_synced_meta(car, "color", json!("red")).await;
    platform.set_stream_synced_meta(car, "siren", json!(true)).await;

    platform.set_position(alice, Vector3::new(-50.0, -50.0, 5.0)).await;
    platform.set_position(alice, Vector3::new(-200.0, -200.0, 0.0)).await;
    platform.destroy_entity(car).await;

    let components = app.context().components();
    if let Ok(db) = components.resolve::<Database>("Database") {
        if let Some(name) = db.player_name(alice) {
            info!("👤 {} is registered as {}", alice, name);
        }
    }
    if let Ok(server) = components.resolve::<ServerStats>("ServerStats") {
        info!(
            "👥 {} connections, {} heartbeats",
            server.connections(),
            server.ticks()
        );
    }

    let stats = app.dispatcher().stats().await;
    let outbound = platform.take_outbox().await;
    info!(
        "📊 Simulation done: {} events dispatched, {} handlers run, {} failures, {} outbound messages",
        stats.events_dispatched,
        stats.handlers_invoked,
        stats.handler_failures,
        outbound.len()
    );
    for message in &outbound {
        debug!("📤 {:?} <- {} {:?}", message.target, message.event_name, message.args.values());
    }

    Ok(SimulationSummary {
        outbound,
        events_dispatched: stats.events_dispatched,
        handler_failures: stats.handler_failures,
    })
}

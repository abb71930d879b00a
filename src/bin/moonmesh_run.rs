//! Headless simulation driver.
//!
//! Loads a [`moonmesh_sim::config::SimulatorConfig`], optionally loads a
//! GeoJSON building environment, constructs an [`moonmesh_sim::engine::Engine`],
//! and steps it for a fixed number of ticks, logging summary statistics at a
//! fixed cadence. This plays the role a UI event loop would otherwise play:
//! the external collaborator the engine is written against, without any
//! rendering.

use std::env;

use env_logger::Builder;
use log::LevelFilter;
use rand::Rng;

use moonmesh_sim::agent::WORLD_HALF_EXTENT_M;
use moonmesh_sim::config::SimulatorConfig;
use moonmesh_sim::device::PowerMode;
use moonmesh_sim::engine::Engine;
use moonmesh_sim::environment::{self, Environment};
use moonmesh_sim::geometry::Point;

struct Args {
    config_path: Option<String>,
    environment_path: Option<String>,
    ticks: u64,
    dt_ms: Option<u64>,
    log_every: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        config_path: None,
        environment_path: None,
        ticks: 600,
        dt_ms: None,
        log_every: 50,
    };

    let mut raw = env::args().skip(1);
    while let Some(flag) = raw.next() {
        match flag.as_str() {
            "--config" => args.config_path = raw.next(),
            "--environment" => args.environment_path = raw.next(),
            "--ticks" => {
                if let Some(v) = raw.next() {
                    args.ticks = v.parse().unwrap_or(args.ticks);
                }
            }
            "--dt-ms" => {
                if let Some(v) = raw.next() {
                    args.dt_ms = v.parse().ok();
                }
            }
            "--log-every" => {
                if let Some(v) = raw.next() {
                    args.log_every = v.parse().unwrap_or(args.log_every);
                }
            }
            other => {
                log::warn!("ignoring unrecognized argument: {other}");
            }
        }
    }

    args
}

fn init_logging() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("moonmesh_sim"), LevelFilter::Debug)
        .parse_default_env()
        .init();
}

/// Scatter `count` agents at random positions across the open world,
/// skipping any point that falls inside a building.
fn spawn_agents(engine: &mut Engine, count: usize) {
    for i in 0..count {
        let position = loop {
            let x = engine.rng.gen_range(-WORLD_HALF_EXTENT_M..=WORLD_HALF_EXTENT_M);
            let y = engine.rng.gen_range(-WORLD_HALF_EXTENT_M..=WORLD_HALF_EXTENT_M);
            let candidate = Point::new(x, y);
            if engine.environment.inside_building(&candidate).is_none() {
                break candidate;
            }
        };
        let power_mode = match i % 3 {
            0 => PowerMode::Eco,
            1 => PowerMode::Performance,
            _ => PowerMode::Normal,
        };
        engine.add_agent(format!("agent-{i}"), position, format!("nickname-{i}"), power_mode);
    }
}

fn main() {
    init_logging();

    let args = parse_args();

    let config = match &args.config_path {
        Some(path) => SimulatorConfig::load(path).unwrap_or_else(|err| {
            log::error!("failed to load config from {path}: {err:#}");
            std::process::exit(1);
        }),
        None => SimulatorConfig::default(),
    };

    let environment = match &args.environment_path {
        Some(path) => environment::load_geojson(path, None).unwrap_or_else(|err| {
            log::error!("failed to load environment from {path}: {err:#}");
            std::process::exit(1);
        }),
        None => Environment::new(vec![]),
    };

    let dt_ms = args.dt_ms.unwrap_or(config.tick_dt_ms);
    let dt_s = dt_ms as f64 / 1000.0;
    let agent_count = config.default_agent_count;

    log::info!("starting simulation: seed={} agents={} dt_ms={dt_ms} ticks={}", config.seed, agent_count, args.ticks);

    let mut engine = Engine::new(config, environment);
    spawn_agents(&mut engine, agent_count);

    engine.log_manager.subscribe(|entry| {
        log::debug!("[{}] {:?}/{:?} {}", entry.formatted_timestamp(), entry.level, entry.category, entry.message);
    });

    for tick in 1..=args.ticks {
        engine.step(dt_s);

        if tick % args.log_every == 0 || tick == args.ticks {
            log::info!(
                "tick={tick} sim_time_ms={} agents={} active_links={} confirmed_edges={}",
                engine.sim_time_ms,
                engine.agents.len(),
                engine.active_link_count(),
                engine.mesh_graph_edges(),
            );
        }
    }

    log::info!(
        "simulation finished: {} ticks, {} active links, {} confirmed mesh edges",
        engine.tick,
        engine.active_link_count(),
        engine.mesh_graph_edges(),
    );
}

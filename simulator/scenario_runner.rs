// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/default.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/ghost.yaml --seed 0x1234... --verbose
//   cargo run --bin scenario_runner scenarios/churn.yaml --snapshot final.yaml

mod event_sink;

use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use cg_rust::cg_stats::NoOpSnapshots;
use cg_rust::{Country, GraphSnapshot, RunResult, SimConfig, SimError, SimRunner, Simulation};
use event_sink::LoggingEventSink;
use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Scenario file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    meta: ScenarioMeta,

    /// Simulation configuration; missing fields take their defaults
    #[serde(default)]
    config: SimConfig,

    /// Tick at which miner growth is stopped
    #[serde(default)]
    stop_growth_at: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
}

struct Options {
    path: PathBuf,
    seed: Option<[u8; 32]>,
    verbose: bool,
    snapshot: Option<PathBuf>,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!(
                "Usage: {} <scenario.yaml | directory/> [--seed SEED_HEX] [--verbose] [--snapshot FILE]",
                args[0]
            );
            eprintln!("\nExamples:");
            eprintln!("  {} scenarios/default.yaml", args[0]);
            eprintln!("  {} scenarios/", args[0]);
            eprintln!("  {} scenarios/ghost.yaml --seed 0x123456...", args[0]);
            std::process::exit(1);
        }
    };

    let level = if options.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to install logger: {}", e);
    }

    let path = options.path.as_path();
    if path.is_file() {
        run_scenario_file(path, &options);
    } else if path.is_dir() {
        run_scenario_directory(path, &options);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut rest = args.iter().skip(1);
    let path = rest
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| "Missing scenario path".to_string())?;

    let mut options = Options {
        path,
        seed: None,
        verbose: false,
        snapshot: None,
    };
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--seed" => {
                let hex = rest.next().ok_or("--seed needs a value")?;
                options.seed = Some(parse_seed_hex(hex)?);
            }
            "--snapshot" => {
                let file = rest.next().ok_or("--snapshot needs a value")?;
                options.snapshot = Some(PathBuf::from(file));
            }
            "--verbose" | "-v" => options.verbose = true,
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(options)
}

fn run_scenario_directory(dir: &Path, options: &Options) {
    let mut scenarios = Vec::new();

    // Find all .yaml files
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                 ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, options);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete!                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
}

fn run_scenario_file(path: &Path, options: &Options) {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path.display(), e);
        std::process::exit(1);
    });

    let scenario: ScenarioFile = serde_yaml::from_str(&yaml_content).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {}", path.display(), e);
        std::process::exit(1);
    });

    // Print scenario header
    let name = scenario.meta.name.clone().unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("scenario")
            .to_string()
    });
    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  {}{}║", name, " ".repeat(54_usize.saturating_sub(name.len())));
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc.trim());
    }

    let mut config = scenario.config;
    if options.seed.is_some() {
        config.seed = options.seed;
    }

    println!("Configuration:");
    println!("  Protocol: {:?}", config.protocol);
    println!(
        "  Nodes: {} full, {} miners, {} light, {} listening",
        config.nodes.full, config.nodes.miners, config.nodes.light, config.nodes.listening
    );
    println!("  Ticks: {} ({} per month)", config.schedule.ticks, config.schedule.ticks_per_month);
    println!(
        "  Economy: reward {}, payment {} every {} ticks",
        config.economy.block_reward, config.economy.payment_amount, config.schedule.payment_interval
    );
    if config.growth.enabled {
        println!(
            "  Growth: {} miners/month at speed {}",
            config.growth.miners_per_month, config.growth.simulation_speed
        );
    }
    println!("\nStarting simulation...\n");

    let sink = Rc::new(RefCell::new(LoggingEventSink::default()));
    let sim = Simulation::new_with_sinks(config, Box::new(sink.clone()), Box::new(NoOpSnapshots))
        .unwrap_or_else(|e| {
            eprintln!("Invalid scenario {}: {}", path.display(), e);
            std::process::exit(1);
        });

    let mut runner = SimRunner::from_simulation(sim);
    if let Err(e) = run_schedule(&mut runner, scenario.stop_growth_at) {
        eprintln!("Simulation failed at tick {}: {}", runner.tick(), e);
        std::process::exit(1);
    }

    if let Some(ref file) = options.snapshot {
        let sim = runner.sim();
        let snapshot = GraphSnapshot::capture(sim.current_step(), sim.graph(), sim.protocol());
        match snapshot.to_yaml() {
            Ok(yaml) => {
                if let Err(e) = fs::write(file, yaml) {
                    eprintln!("Failed to write {}: {}", file.display(), e);
                } else {
                    println!("Snapshot written to {}", file.display());
                }
            }
            Err(e) => eprintln!("Failed to serialize snapshot: {}", e),
        }
    }

    let result = runner.finish();
    print_summary(&result, &sink.borrow().counts);

    println!("\n✓ Scenario complete!\n");
}

fn run_schedule(runner: &mut SimRunner, stop_growth_at: Option<u64>) -> Result<(), SimError> {
    let ticks = runner.sim().config().schedule.ticks;
    runner.start()?;
    while runner.tick() < ticks {
        if stop_growth_at == Some(runner.tick()) {
            runner.stop_growth();
        }
        runner.advance()?;
    }
    Ok(())
}

fn print_summary(result: &RunResult, events: &event_sink::EventTypeCounts) {
    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║    CHAIN GOSSIP SIMULATION RESULTS                     ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let seed_hex: String = result.seed_used.iter().map(|b| format!("{:02x}", b)).collect();
    println!("Seed: 0x{}", seed_hex);
    println!("Protocol: {:?}", result.protocol);
    println!("Ticks: {}, Steps: {}", result.ticks, result.steps);
    println!();

    let c = &result.counters;
    println!("═══ Mining ═══");
    println!("  Blocks Mined: {}", c.blocks_mined);
    println!("  Empty Populations: {}", c.empty_population);
    println!();

    println!("═══ Gossip ═══");
    println!("  Hops Sent: {}", c.hops_sent);
    println!("  Adoptions: {}", c.adoptions);
    println!("  Converged: {}", c.hops_converged);
    println!("  Suppressed: {}", c.hops_suppressed);
    println!("  Dropped: {}", c.hops_dropped);
    println!("  Chain Updates: {}", c.chain_updates);
    if result.pending_events > 0 {
        println!("  Still Queued: {}", result.pending_events);
    }
    println!();

    println!("═══ Economy ═══");
    println!("  Payment Passes: {}", c.payment_passes);
    println!("  Miners Died: {}", c.miners_died);
    println!("  Miners Joined: {}", c.miners_joined);
    println!("  Final: {} nodes, {} miners", result.final_nodes, result.final_miners);
    println!();

    println!("═══ Consensus ═══");
    println!(
        "  Head Agreement: {:.1}% of {} nodes",
        result.head_agreement() * 100.0,
        result.heads.len()
    );
    println!();

    println!("═══ Event Sink ═══");
    println!(
        "  mined={} adopted={} suppressed={} dropped={} died={} joined={} empty={}",
        events.mined,
        events.adopted,
        events.suppressed,
        events.dropped,
        events.died,
        events.joined,
        events.empty
    );
    println!();

    if !result.miner_counts.is_empty() {
        println!("═══ Monthly Miners (total / per country) ═══");
        for (month, figures) in &result.miner_counts.points {
            let countries: Vec<String> = Country::ALL
                .iter()
                .map(|c| format!("{:?}={:.0}", c, figures.country(*c)))
                .collect();
            let money = result
                .mean_money
                .get(*month)
                .map(|m| m.total)
                .unwrap_or(0.0);
            println!(
                "  M{:<3} {:>4.0} miners, mean money {:>8.1}  [{}]",
                month,
                figures.total,
                money,
                countries.join(" ")
            );
        }
        println!();
    }
}

fn parse_seed_hex(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i >= 32 {
            break;
        }
        let byte_str = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
        seed[i] = u8::from_str_radix(byte_str, 16)
            .map_err(|e| format!("Invalid hex seed: {}", e))?;
    }

    Ok(seed)
}

//! Metaguide CLI - Run an optimization from JSON configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;

use metaguide::{
    compute::{Optimizer, SyntheticAdapter, SyntheticConfig, scheduler::Scheduler},
    schema::{OptimizationPhase, OptimizerConfig, SchedulerConfig},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [options]", args[0]);
        eprintln!();
        eprintln!("Optimize a periodic waveguide from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json           Path to optimizer configuration file");
        eprintln!("  --adapter <file>      Synthetic engine configuration (default: built-in)");
        eprintln!("  --out <file>          Write the optimization result as JSON");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let mut adapter_path = None;
    let mut out_path = None;
    let mut rest = args[2..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--adapter" => adapter_path = rest.next().map(PathBuf::from),
            "--out" => out_path = rest.next().map(PathBuf::from),
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let config: OptimizerConfig = load_json(&config_path, "config");
    let adapter_config: SyntheticConfig = match &adapter_path {
        Some(path) => load_json(path, "adapter config"),
        None => SyntheticConfig::default(),
    };

    println!("Metaguide Optimization");
    println!("======================");
    println!("Parameters: {}", config.parameters.len());
    println!("Population: {}", config.genetic.population_size);
    println!("Max generations: {}", config.genetic.max_generations);
    match config.scheduler {
        SchedulerConfig::Serial => println!("Scheduler: serial"),
        SchedulerConfig::Parallel {
            max_simultaneous_sessions,
        } => println!("Scheduler: parallel ({} sessions)", max_simultaneous_sessions),
    }
    println!("Policy: {:?}", config.convergence);
    println!();

    let adapter = SyntheticAdapter::new(adapter_config).unwrap_or_else(|e| {
        eprintln!("Error creating adapter: {}", e);
        std::process::exit(1);
    });
    let scheduler = Scheduler::from_config(&config.scheduler, &adapter);
    let mut optimizer = Optimizer::new(config, scheduler).unwrap_or_else(|e| {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    });

    println!("Running optimization...");
    let start = Instant::now();

    let result = optimizer.run_with_callback(|progress| {
        if progress.phase == OptimizationPhase::Initializing {
            return;
        }
        let best = progress.best.as_ref().map_or(f64::NEG_INFINITY, |b| b.fitness);
        println!(
            "  Generation {}/{}: best={:.6}, generation best={:.6}, failed={}",
            progress.generation,
            progress.max_generations,
            best,
            progress.generation_best,
            progress.generation_failures
        );
    });

    let elapsed = start.elapsed();

    println!();
    println!("Stopped: {:?}", result.stats.stop_reason);
    println!(
        "Evaluations: {} ({} failed)",
        result.stats.total_evaluations, result.stats.failed_evaluations
    );
    match &result.best {
        Some(best) => {
            println!("Best fitness: {:.6}", best.fitness);
            for (name, value) in &best.parameters {
                println!("  {} = {:.6e}", name, value);
            }
        }
        None => println!("No candidate produced a finite fitness"),
    }
    println!("Time: {:.2}s", elapsed.as_secs_f32());

    if let Some(path) = out_path {
        let json = to_json(&result);
        if let Err(e) = fs::write(&path, json) {
            eprintln!("Error writing result: {}", e);
            std::process::exit(1);
        }
        println!("Result written to {}", path.display());
    }
}

fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> T {
    let text = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading {} file: {}", what, e);
        std::process::exit(1);
    });
    serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("Error parsing {}: {}", what, e);
        std::process::exit(1);
    })
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing: {}", e);
        std::process::exit(1);
    })
}

fn print_example_config() {
    println!("Example configuration (config.json):");
    println!("{}", to_json(&OptimizerConfig::default()));
    println!();
    println!("Example adapter configuration (synthetic.json):");
    println!("{}", to_json(&SyntheticConfig::default()));
}

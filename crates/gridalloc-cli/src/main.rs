//! Command-line front end for the grid-tied allocator.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gridalloc_algo::GridTiedAllocation;
use gridalloc_core::config::{
    install_global_config, AllocationType, ItemConfig, OptimizerConfig, Resonance,
};

#[derive(Parser)]
#[command(
    name = "gridalloc",
    version,
    about = "Distribute a reference command across grid-tied machines"
)]
struct Cli {
    /// Log verbosity
    #[arg(long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve one allocation from a TOML configuration file
    Solve {
        /// Path to the optimizer configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Current machine outputs, comma separated, indexed by machine index
        #[arg(long, value_delimiter = ',', required = true)]
        state: Vec<f32>,

        /// Reference command to distribute
        #[arg(long)]
        command: f32,

        /// Print the solution as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run the built-in eight-machine demonstration sweep
    Demo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    match cli.command {
        Commands::Solve {
            config,
            state,
            command,
            json,
        } => solve(&config, &state, command, json),
        Commands::Demo => demo(),
    }
}

fn solve(path: &Path, state: &[f32], command: f32, json: bool) -> Result<()> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: OptimizerConfig =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    config.check()?;

    // Process-wide snapshot for diagnostics; the solver gets its own copy.
    install_global_config(config.clone());

    let allocator = GridTiedAllocation::new(config);
    let solution = allocator.process(state, command)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&solution)?);
        return Ok(());
    }

    println!("method: {}  ({} ms)", solution.method, solution.solve_time_ms);
    println!("{:>8}  {:>12}", "machine", "value");
    for entry in &solution.entries {
        println!("{:>8}  {:>12.3}", entry.index, entry.value);
    }
    println!("{:>8}  {:>12.3}", "total", solution.total());
    Ok(())
}

/// Built-in demonstration scenario: eight machines, a command sweep,
/// each result fed back in as the next state.
fn demo() -> Result<()> {
    let config = demo_config();
    config.check()?;
    install_global_config(config.clone());

    let allocator = GridTiedAllocation::new(config);
    let commands = [
        400.0, 800.0, 1200.0, 1600.0, 1500.0, 1000.0, 600.0, 1300.0, 1730.0,
    ];

    let mut state: Vec<f32> = vec![100.0, 80.0, 45.0, 10.0, 100.0, 70.0, 10.0, 180.0];
    for command in commands {
        let start = Instant::now();
        let solution = allocator.process(&state, command)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let values: Vec<String> = solution
            .entries
            .iter()
            .map(|entry| format!("{:.1}", entry.value))
            .collect();
        info!(
            "command {command:7.1} -> [{}]  total {:.1}  via {} in {elapsed_ms:.2} ms",
            values.join(", "),
            solution.total(),
            solution.method,
        );

        state = solution.entries.iter().map(|entry| entry.value).collect();
    }
    Ok(())
}

fn demo_config() -> OptimizerConfig {
    let machine = |index: u32, upper: f32, zones: &[(f32, f32)]| ItemConfig {
        index,
        enabled: true,
        lower_bound: 0.0,
        upper_bound: upper,
        assigned_factor: 0.125,
        resonances: zones
            .iter()
            .map(|&(lower, upper)| Resonance::new(lower, upper))
            .collect(),
    };

    OptimizerConfig {
        allocation_type: AllocationType::Proportional,
        allocation_resolution: 15.0,
        refiner_enabled: true,
        items: vec![
            machine(0, 250.0, &[(0.0, 30.0), (50.0, 110.0)]),
            machine(1, 200.0, &[(0.0, 40.0), (50.0, 60.0)]),
            machine(2, 150.0, &[(10.0, 30.0), (60.0, 100.0)]),
            machine(3, 180.0, &[(20.0, 50.0), (70.0, 120.0)]),
            machine(4, 200.0, &[(0.0, 20.0), (40.0, 130.0)]),
            machine(5, 150.0, &[(0.0, 10.0), (30.0, 50.0)]),
            machine(6, 200.0, &[(20.0, 40.0), (70.0, 100.0)]),
            machine(7, 400.0, &[(20.0, 60.0), (90.0, 110.0)]),
        ],
        ..OptimizerConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_config_passes_validation() {
        assert!(demo_config().check().is_ok());
    }

    #[test]
    fn config_parses_from_toml() {
        let raw = r#"
            allocation_type = "proportional"
            allocation_resolution = 15.0
            refiner_enabled = true

            [[items]]
            index = 0
            enabled = true
            lower_bound = 0.0
            upper_bound = 250.0
            assigned_factor = 0.5
            resonances = [
                { lower = 0.0, upper = 30.0 },
                { lower = 50.0, upper = 110.0 },
            ]

            [[items]]
            index = 1
            enabled = true
            lower_bound = 0.0
            upper_bound = 200.0
            assigned_factor = 0.5
            resonances = []
        "#;
        let config: OptimizerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.allocation_type, AllocationType::Proportional);
        assert_eq!(config.items.len(), 2);
        assert_eq!(config.items[0].resonances.len(), 2);
        assert!(config.check().is_ok());
    }
}

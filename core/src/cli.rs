use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::warn;

use crate::breakpoints::PathItem;
use crate::config::Config;
use crate::debugger::Debugger;
use crate::events::DebugEvent;
use crate::sim::{Network, Op, SimEngine};
use crate::types::{DebugMode, VariableId};
use crate::unit::ProcessorPool;
use crate::watches::Watch;

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Strand - debug and hazard detection for forking graph traversal", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides STRAND_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug mode for new units (overrides config file and env vars)
    #[arg(long, global = true, value_enum)]
    pub mode: Option<ModeArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Run a scenario on the reference engine and print its events
    Demo {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Off,
    Normal,
    SlowMotion,
}

impl From<ModeArg> for DebugMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Off => DebugMode::Off,
            ModeArg::Normal => DebugMode::Normal,
            ModeArg::SlowMotion => DebugMode::SlowMotion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Two units touch the same watched node
    Hazard,
    /// A fork with a breakpoint on one saved path
    Fork,
    /// Forced stop of paused and running units
    Stop,
    /// Units advanced by the shared ticker
    SlowMotion,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let config = Config::builder()
        .config_path(cli.config)
        .mode(cli.mode.map(DebugMode::from))
        .build()?;

    match cli.command {
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }

        Commands::Demo { scenario, json } => {
            let events = run_demo(scenario, config).await?;
            for event in &events {
                if json {
                    println!("{}", serde_json::to_string(event)?);
                } else {
                    println!("{}", describe(event));
                }
            }
        }
    }

    Ok(())
}

/// Run `scenario` to completion and return every event it published.
///
/// Hazard, fork and stop need pausing units: they run in `normal` mode
/// unless `slow_motion` was configured. The slow-motion demo always uses
/// slow motion.
pub async fn run_demo(scenario: Scenario, mut config: Config) -> Result<Vec<DebugEvent>> {
    config.debug.mode = match (scenario, config.debug.mode) {
        (Scenario::SlowMotion, _) => DebugMode::SlowMotion,
        (_, DebugMode::Off) => DebugMode::Normal,
        (_, mode) => mode,
    };

    let network = Arc::new(Network::new());
    let debugger = Arc::new(Debugger::with_store(config, network.clone()));
    let mut events = debugger.subscribe();
    let engine = SimEngine::new(network, debugger.clone(), Handle::current());

    match scenario {
        Scenario::Hazard => demo_hazard(&engine).await,
        Scenario::Fork => demo_fork(&engine).await,
        Scenario::Stop => demo_stop(&engine).await,
        Scenario::SlowMotion => demo_slow_motion(&engine).await,
    }

    // Whatever is still alive (e.g. a timed-out wait) is stopped here.
    if engine.active_count() > 0 {
        debugger.stop_and_unblock(engine.as_ref()).await?;
    }
    debugger.stop_slow_motion();

    Ok(drain(&mut events))
}

/* ===================== Scenarios ===================== */

const X: VariableId = VariableId(1);

async fn demo_hazard(engine: &Arc<SimEngine>) {
    let net = engine.network();
    let debugger = engine.debugger();

    let shared = net.add_node("shared");
    let meaning = net.add_node("is-a");
    let other = net.add_node("other");

    let owner_start = net.add_node("owner");
    net.add_statement(owner_start, Op::Assign { var: X, values: vec![shared] });
    let hold = net.add_statement(owner_start, Op::Nop);

    let intruder_start = net.add_node("intruder");
    net.add_statement(intruder_start, Op::Link { from: shared, meaning, to: other });
    net.add_statement(intruder_start, Op::Nop);

    debugger.add_watch(Watch::variable("x", X));
    debugger.add_breakpoint(hold);

    let owner = engine.start(owner_start);
    settle("owner paused", || owner.control().is_paused()).await;

    let intruder = engine.start(intruder_start);
    settle("intruder paused", || intruder.control().is_paused()).await;

    debugger.continue_all();
    settle("units finished", || engine.active_count() == 0).await;
}

async fn demo_fork(engine: &Arc<SimEngine>) {
    let net = engine.network();
    let debugger = engine.debugger();

    let start = net.add_node("start");
    let via = net.add_node("via");
    net.add_statement(start, Op::Nop);

    let mut relations = Vec::new();
    for name in ["a", "b", "c"] {
        let target = net.add_node(name);
        net.add_statement(target, Op::Nop);
        relations.push(net.add_link(start, via, target));
    }

    debugger.add_path(
        "second branch",
        vec![PathItem {
            node: relations[1],
            is_breakpoint: true,
        }],
    );

    engine.start(start);
    settle("branch paused", || {
        debugger.tree().units().iter().any(|u| u.control().is_paused())
    })
    .await;

    debugger.continue_all();
    settle("units finished", || engine.active_count() == 0).await;
}

async fn demo_stop(engine: &Arc<SimEngine>) {
    let net = engine.network();
    let debugger = engine.debugger();

    let mut paused = Vec::new();
    for name in ["first", "second"] {
        let node = net.add_node(name);
        let stmt = net.add_statement(node, Op::Nop);
        debugger.add_breakpoint(stmt);
        paused.push(engine.start(node));
    }

    let looping = net.add_node("loop");
    let next = net.add_node("next");
    net.add_statement(looping, Op::Wait(Duration::from_millis(5)));
    net.add_link(looping, next, looping);
    engine.start(looping);

    settle("units paused", || paused.iter().all(|u| u.control().is_paused())).await;

    if let Err(err) = debugger.stop_and_unblock(engine.as_ref()).await {
        warn!("{}", err);
    }
}

async fn demo_slow_motion(engine: &Arc<SimEngine>) {
    let net = engine.network();
    let debugger = engine.debugger();

    let nodes: Vec<_> = ["one", "two", "three"]
        .into_iter()
        .map(|name| net.add_node(name))
        .collect();
    for node in &nodes {
        net.add_statement(*node, Op::Nop);
    }
    let next = net.add_node("next");
    for pair in nodes.windows(2) {
        net.add_link(pair[0], next, pair[1]);
    }

    debugger.start_slow_motion(&Handle::current());
    engine.start(nodes[0]);

    let budget = debugger.config().slow_motion_interval() * (nodes.len() as u32 + 2);
    if !engine.wait_idle(budget).await {
        warn!("slow-motion demo did not finish within {:?}", budget);
    }
}

/* ===================== Output ===================== */

/// Poll `cond` for up to five seconds.
async fn settle(what: &str, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    warn!("gave up waiting: {}", what);
    false
}

fn drain(events: &mut broadcast::Receiver<DebugEvent>) -> Vec<DebugEvent> {
    let mut out = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged");
            }
            Err(_) => break,
        }
    }
    out
}

pub fn describe(event: &DebugEvent) -> String {
    match event {
        DebugEvent::Paused { unit, reason } => format!("{} paused ({:?})", unit, reason),
        DebugEvent::Continued { unit } => format!("{} continued", unit),
        DebugEvent::Finished { unit } => format!("{} finished", unit),
        DebugEvent::Split { parent, children } => {
            let children: Vec<String> = children.iter().map(ToString::to_string).collect();
            format!("{} split into {}", parent, children.join(", "))
        }
        DebugEvent::Hazard(report) => format!(
            "HAZARD {} (owner {}, originator {})",
            report.message, report.owner_name, report.originator_name
        ),
        DebugEvent::TreeChanged => "tree changed".to_string(),
        DebugEvent::StopFailed { remaining } => {
            format!("STOP FAILED with {} unit(s) still running", remaining)
        }
    }
}

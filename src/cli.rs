//! Command-line interface.
//!
//! Without a subcommand the binary serves MCP over stdio. The other commands
//! run one operation against the configured graph and print a report.

use clap::{Parser, Subcommand};

use crate::analysis::{ImpactAnalysisResult, Severity, TriggerEvent};
use crate::discovery::DiscoveryOutcome;
use crate::engine::ImpactEngine;
use crate::graph::GraphSnapshot;

const RULE: &str =
    "═══════════════════════════════════════════════════════════════════════════════\n\n";

/// Service dependency cascade and impact analysis.
#[derive(Parser, Debug)]
#[command(name = "mcp-cascade-impact", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve MCP over stdio (default)
    Serve,

    /// Analyze the impact of an event on a service
    Analyze {
        /// Service where the event happens
        service_id: String,

        /// failure, degradation, latency_spike, capacity_exhaustion or deployment
        #[arg(long, default_value = "failure")]
        event: TriggerEvent,

        /// low, medium, high or critical
        #[arg(long, default_value = "high")]
        severity: Severity,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show layers, circular groups and the critical path
    Topology,

    /// Run dependency discovery for one service
    Discover {
        /// Service to discover dependencies for
        service_id: String,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a one-shot command. `Serve` is handled by the caller.
pub async fn execute_command(command: Commands, engine: &ImpactEngine) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not a one-shot command"),
        Commands::Analyze {
            service_id,
            event,
            severity,
            json,
        } => match engine.analyze_service_impact(&service_id, event, severity).await {
            Ok(result) if json => match serde_json::to_string_pretty(result.as_ref()) {
                Ok(text) => CliResult::success(text),
                Err(e) => CliResult::error(format!("Failed to serialize result: {}", e)),
            },
            Ok(result) => CliResult::success(render_analysis(&result)),
            Err(e) => CliResult::error(format!("Analysis failed: {}", e)),
        },
        Commands::Topology => {
            let snapshot = engine.get_dependency_graph().await;
            CliResult::success(render_topology(&snapshot))
        }
        Commands::Discover { service_id } => {
            match engine.discover_service_dependencies(&service_id).await {
                Ok(outcome) => CliResult::success(render_discovery(&outcome)),
                Err(e) => CliResult::error(format!("Discovery failed: {}", e)),
            }
        }
    }
}

fn render_analysis(result: &ImpactAnalysisResult) -> String {
    let mut output = String::new();
    let trigger = &result.trigger;

    output.push_str(&format!(
        "\nImpact of {} {} ({})\n",
        trigger.severity, trigger.event, trigger.service_id
    ));
    output.push_str(RULE);

    let radius = &result.cascade_analysis.blast_radius;
    output.push_str("Blast Radius:\n");
    output.push_str(&format!("  Tier 1 (≤2m):   {}\n", list(&radius.tier1)));
    output.push_str(&format!("  Tier 2 (≤10m):  {}\n", list(&radius.tier2)));
    output.push_str(&format!("  Tier 3 (≤30m):  {}\n", list(&radius.tier3)));
    if !radius.beyond_horizon.is_empty() {
        output.push_str(&format!("  Later:          {}\n", list(&radius.beyond_horizon)));
    }
    output.push('\n');

    output.push_str("Top Propagation Paths:\n");
    if result.cascade_analysis.paths.is_empty() {
        output.push_str("  (none)\n");
    }
    for path in &result.cascade_analysis.paths {
        output.push_str(&format!(
            "  {:>5.1}%  {:>6.0}s  {}\n",
            path.probability * 100.0,
            path.cumulative_secs,
            path.services.join(" → ")
        ));
    }
    if result.cascade_analysis.truncated {
        output.push_str("  (enumeration truncated)\n");
    }
    output.push('\n');

    let business = &result.business_impact;
    output.push_str("Business Impact:\n");
    output.push_str(&format!("  Users Affected:   {}\n", business.users_affected));
    output.push_str(&format!("  Revenue at Risk:  {:.2}\n", business.revenue_at_risk));
    output.push_str(&format!("  SLA Breach Risk:  {:.1}%\n", business.sla_breach_risk * 100.0));
    output.push_str(&format!("  Operational Cost: {:.2}\n", business.operational_cost));
    output.push('\n');

    output.push_str("Mitigations:\n");
    for strategy in result.mitigation_strategies.iter().take(5) {
        output.push_str(&format!(
            "  [{}] {} (effectiveness {:.0}%, {:.0}m)\n",
            strategy.target,
            strategy.description,
            strategy.effectiveness * 100.0,
            strategy.time_to_implement_minutes
        ));
    }

    output.push_str(&format!("\nAnalysis ID: {}\n", result.analysis_id));
    output
}

fn render_topology(snapshot: &GraphSnapshot) -> String {
    let mut output = String::new();
    let topology = &snapshot.topology;

    output.push_str(&format!(
        "\nDependency Topology (version {}, {} services, {} dependencies)\n",
        snapshot.version,
        snapshot.graph.node_count(),
        snapshot.graph.edge_count()
    ));
    output.push_str(RULE);

    for (index, layer) in topology.layers.iter().enumerate() {
        output.push_str(&format!("  Layer {}: {}\n", index, list(layer)));
    }
    for group in &topology.circular_groups {
        output.push_str(&format!("  Circular: {}\n", list(group)));
    }
    if !topology.cycle_dependents.is_empty() {
        output.push_str(&format!(
            "  Downstream of cycles: {}\n",
            list(&topology.cycle_dependents)
        ));
    }

    output.push_str(&format!(
        "\nCritical Path (weight {:.2}): {}\n",
        topology.critical_path.weight,
        topology.critical_path.services.join(" → ")
    ));
    output
}

fn render_discovery(outcome: &DiscoveryOutcome) -> String {
    let mut output = String::new();

    output.push_str(&format!("\nDiscovery for {}\n", outcome.service_id));
    output.push_str(RULE);
    output.push_str(&format!("  Methods Used:   {}\n", list(&outcome.methods_used)));
    if !outcome.failed_methods.is_empty() {
        output.push_str(&format!("  Failed Methods: {}\n", list(&outcome.failed_methods)));
    }
    output.push_str(&format!("  Confidence:     {:.2}\n", outcome.confidence));
    output.push_str(&format!("  Edges Written:  {}\n\n", outcome.edges_written));

    for edge in &outcome.edges {
        output.push_str(&format!(
            "  {} → {} ({}, {:.2})\n",
            edge.from,
            edge.to,
            edge.kind,
            edge.confidence()
        ));
    }
    output
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

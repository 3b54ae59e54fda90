use crate::compile::CompiledGraph;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Per-node runtime statistics surfaced in the DOT output of an executing
/// task.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub avg_exec_ns: i64,
    /// Only join nodes report this.
    pub dropped: Option<u64>,
}

/// Snapshot of a task's runtime counters, keyed by node ID.
#[derive(Debug, Clone, Default)]
pub struct ExecStats {
    /// Points per second through the task source.
    pub throughput: f64,
    pub nodes: BTreeMap<String, NodeStats>,
    /// (parent, child) -> messages passed along the edge.
    pub edges: BTreeMap<(String, String), u64>,
}

/// Renders the graph in DOT form.
///
/// Without stats (disabled task) the output is the bare edge list:
/// `digraph id {\na -> b;\n}`. With stats each node line carries
/// `avg_exec_time_ns` and each edge `processed`, matching what the
/// executing-task diagnostics have always looked like.
pub fn render(graph: &CompiledGraph, task_id: &str, stats: Option<&ExecStats>) -> String {
    match stats {
        None => {
            let mut out = format!("digraph {task_id} {{\n");
            for edge in graph.graph.raw_edges() {
                let parent = &graph.graph[edge.source()].id;
                let child = &graph.graph[edge.target()].id;
                let _ = writeln!(out, "{parent} -> {child};");
            }
            out.push('}');
            out
        }
        Some(stats) => {
            let mut out = format!("digraph {task_id} {{\n");
            let _ = writeln!(
                out,
                "graph [throughput=\"{:.2} points/s\"];",
                stats.throughput
            );
            let order = graph.topo();
            for idx in &order {
                let node = graph.node(*idx);
                let node_stats = stats.nodes.get(&node.id).cloned().unwrap_or_default();
                out.push('\n');
                match node_stats.dropped {
                    Some(dropped) => {
                        let _ = writeln!(
                            out,
                            "{} [avg_exec_time_ns=\"{}\" dropped=\"{dropped}\" ];",
                            node.id,
                            go_duration(node_stats.avg_exec_ns)
                        );
                    }
                    None => {
                        let _ = writeln!(
                            out,
                            "{} [avg_exec_time_ns=\"{}\" ];",
                            node.id,
                            go_duration(node_stats.avg_exec_ns)
                        );
                    }
                }
                for (child, _) in graph.children(*idx) {
                    let child_id = &graph.node(child).id;
                    let processed = stats
                        .edges
                        .get(&(node.id.clone(), child_id.clone()))
                        .copied()
                        .unwrap_or(0);
                    let _ = writeln!(
                        out,
                        "{} -> {child_id} [processed=\"{processed}\"];",
                        node.id
                    );
                }
            }
            out.push('}');
            out
        }
    }
}

/// Formats nanoseconds the way Go's `time.Duration` prints: `0s`, `512ns`,
/// `1.5µs`, `230ms`, `1.25s`, `1m30s`, `1h0m0s`.
pub fn go_duration(ns: i64) -> String {
    if ns == 0 {
        return "0s".to_string();
    }
    let neg = ns < 0;
    let ns = ns.unsigned_abs();
    let body = if ns < 1_000 {
        format!("{ns}ns")
    } else if ns < 1_000_000 {
        format!("{}µs", trim_frac(ns as f64 / 1_000.0))
    } else if ns < 1_000_000_000 {
        format!("{}ms", trim_frac(ns as f64 / 1_000_000.0))
    } else {
        let secs = ns / 1_000_000_000;
        let frac = ns % 1_000_000_000;
        if secs < 60 {
            if frac == 0 {
                format!("{secs}s")
            } else {
                format!("{}s", trim_frac(ns as f64 / 1_000_000_000.0))
            }
        } else if secs < 3_600 {
            format!("{}m{}s", secs / 60, trim_frac(ns as f64 / 1e9 - (secs / 60 * 60) as f64))
        } else {
            let hours = secs / 3_600;
            let mins = (secs % 3_600) / 60;
            format!(
                "{hours}h{mins}m{}s",
                trim_frac((secs % 60) as f64 + frac as f64 / 1e9)
            )
        }
    };
    if neg {
        format!("-{body}")
    } else {
        body
    }
}

fn trim_frac(v: f64) -> String {
    let s = format!("{v:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

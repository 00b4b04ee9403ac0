//! Publishes the graph's configuration and status through the properties
//! interface, including full serialization and reconstruction.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::graph::graph::Graph;
use crate::graph::node::NodeStatus;
use crate::properties::{JsonDumpProperties, JsonLoadProperties, Properties};
use crate::utils::to_milliseconds;

/// One persisted desired edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionDesc {
    pub src: String,
    pub dst: String,
    pub src_output: String,
    pub dst_input: String,
}

impl Graph {
    /// Publishes configuration and status into `props`. The same call
    /// serves dumping (write-out recorders), loading (replay recorders,
    /// which also reconstruct missing nodes from their `type` field and
    /// replay the connection list), and UIs.
    pub fn properties(&mut self, props: &mut dyn Properties) {
        let mut rebuild = false;
        if props.config_bool("rebuild", &mut rebuild, "drop and rebuild all resources") && rebuild
        {
            self.needs_rebuild = true;
        }

        if props.begin_child("graph", "Graph") {
            props.output_text(&format!("iteration: {}", self.iteration));
            props.output_text(&format!("total iterations: {}", self.total_iteration));
            props.output_text(&format!(
                "gpu wait: {:.3}ms",
                to_milliseconds(self.last_gpu_wait)
            ));

            let mut iterations = self.desired_iterations_in_flight;
            if props.config_u32(
                "iterations in flight",
                &mut iterations,
                "bound on concurrently recorded iterations",
            ) {
                self.set_iterations_in_flight(iterations);
            }

            let mut mode = self.time_overwrite_mode;
            let mut value = self.time_overwrite_value;
            let mode_changed = props.config_options(
                "time overwrite",
                &mut mode,
                &["none", "time", "delta"],
                "overwrite the iteration clock",
            );
            let value_changed = props.config_f32(
                "time overwrite value",
                &mut value,
                "seconds (time) or milliseconds (delta)",
            );
            if mode_changed || value_changed {
                self.set_time_overwrite(mode, value);
            }

            props.config_u32("fps limit", &mut self.limit_fps, "0 disables the limiter");
            if self.limit_fps > 0 {
                let sleep: std::time::Duration =
                    self.ring.iter().map(|slot| slot.cpu_sleep_time).sum();
                props.output_text(&format!(
                    "limiter sleep: {:.3}ms",
                    to_milliseconds(sleep)
                ));
            }
            props.config_bool("profiler", &mut self.profiling, "collect per-node timings");
            props.end_child();
        }

        // Load direction: reconstruct nodes present in the recorder but not
        // in the graph. The stored `type` field is authoritative.
        let known: HashSet<String> = self.node_for_identifier.keys().cloned().collect();
        for child in props.list_children() {
            if child == "graph" || known.contains(&child) {
                continue;
            }
            let mut type_name = String::new();
            if props.begin_child(&child, "") {
                props.config_text("type", &mut type_name, "");
                props.end_child();
            }
            if type_name.is_empty() {
                warn!(node = %child, "stored node has no type, skipping");
                continue;
            }
            info!(node = %child, type_name = %type_name, "reconstructing node");
            match self.registry.create(&type_name) {
                Ok(node) => {
                    if let Err(err) = self.add_node_object(&type_name, node, Some(&child)) {
                        warn!(node = %child, error = %err, "could not reconstruct node");
                    }
                }
                Err(err) => {
                    warn!(node = %child, error = %err, "unknown node type, skipping");
                }
            }
        }

        // Per-node sections.
        let identifiers: Vec<String> = self.node_for_identifier.keys().cloned().collect();
        let mut to_remove = Vec::new();
        for identifier in identifiers {
            let id = self.node_for_identifier[&identifier];
            let label = format!("{} ({})", identifier, self.nodes[id].type_name);
            if !props.begin_child(&identifier, &label) {
                continue;
            }

            let mut type_name = self.nodes[id].type_name.clone();
            props.config_text("type", &mut type_name, "node type");

            let mut disable = self.nodes[id].user_disabled;
            if props.config_bool("disable", &mut disable, "exclude the node from the graph") {
                self.nodes[id].user_disabled = disable;
                self.needs_rebuild = true;
            }

            let errors: Vec<String> = self.nodes[id].errors.clone();
            for error in &errors {
                props.output_text(&format!("error: {error}"));
            }
            let stats = self.nodes[id].stats.clone();
            if stats.runs > 0 {
                props.output_text(&format!(
                    "runs: {}, last process: {:.3}ms",
                    stats.runs,
                    to_milliseconds(stats.last_process)
                ));
            }

            // Resolved connection status of the last build.
            if let Some(build) = &self.nodes[id].build {
                for (o, output) in build.outputs.iter().enumerate() {
                    props.output_text(&format!(
                        "output '{}': {} copies, {} receivers",
                        output.name(),
                        build.output_resources[o].len(),
                        build.output_consumers[o].len()
                    ));
                }
                for (j, input) in self.nodes[id].inputs.iter().enumerate() {
                    match build.resolved_inputs[j] {
                        Some(resolved) => {
                            let src = &self.nodes[resolved.src];
                            let output_name = src
                                .build
                                .as_ref()
                                .map(|b| b.outputs[resolved.output].name())
                                .unwrap_or("?");
                            props.output_text(&format!(
                                "input '{}' <- {}.{} (delay {})",
                                input.name(),
                                src.identifier,
                                output_name,
                                input.delay()
                            ));
                        }
                        None => {
                            props.output_text(&format!("input '{}': not connected", input.name()));
                        }
                    }
                }
            }

            if props.begin_child("properties", "Properties") {
                let mut node = self.nodes[id].node.take().expect("node is already running");
                let status = node.properties(props);
                self.nodes[id].node = Some(node);
                props.end_child();

                if status.contains(NodeStatus::NEEDS_REBUILD) {
                    self.needs_rebuild = true;
                }
                if status.contains(NodeStatus::REMOVE_NODE) {
                    to_remove.push(identifier.clone());
                }
            }
            props.end_child();
        }
        for identifier in to_remove {
            self.remove_node(&identifier);
        }

        // Connection list, sorted for stable dumps. In the load direction
        // the stored list is replayed; entries referencing unknown nodes or
        // inputs are skipped with a warning.
        let mut connections: Vec<ConnectionDesc> = Vec::new();
        for (identifier, &id) in &self.node_for_identifier {
            for (src_output, dst, dst_input) in &self.nodes[id].desired_outgoing {
                connections.push(ConnectionDesc {
                    src: identifier.clone(),
                    dst: dst.clone(),
                    src_output: src_output.clone(),
                    dst_input: dst_input.clone(),
                });
            }
        }
        connections.sort();
        let mut value =
            serde_json::to_value(&connections).expect("connection list serializes to JSON");
        if props.serialize_json("connections", &mut value) {
            match serde_json::from_value::<Vec<ConnectionDesc>>(value) {
                Ok(stored) => {
                    for connection in stored {
                        if let Err(err) = self.add_connection(
                            &connection.src,
                            &connection.dst,
                            &connection.src_output,
                            &connection.dst_input,
                        ) {
                            warn!(
                                "skipping stored connection {}.{} -> {}.{}: {}",
                                connection.src,
                                connection.src_output,
                                connection.dst,
                                connection.dst_input,
                                err
                            );
                        }
                    }
                }
                Err(err) => warn!(error = %err, "stored connection list is malformed"),
            }
        }
    }

    /// Serializes the whole graph into a JSON value.
    pub fn dump_json(&mut self) -> serde_json::Value {
        let mut dump = JsonDumpProperties::new();
        self.properties(&mut dump);
        dump.into_value()
    }

    /// Loads a graph previously produced by [`dump_json`](Graph::dump_json):
    /// nodes are reconstructed first (their `type` field is authoritative),
    /// then the connection list is replayed.
    pub fn load_json(&mut self, value: serde_json::Value) {
        let mut load = JsonLoadProperties::new(value);
        self.properties(&mut load);
    }
}

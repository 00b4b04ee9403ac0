//! Graph editing: nodes and desired connections.
//!
//! Edit-time errors (bad identifiers, unknown nodes) are raised synchronously
//! and leave the graph unchanged. Successful edits mark the graph for a
//! rebuild; destructive edits during a run are deferred until the run's
//! submit has completed.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::graph::{DeferredEdit, Graph, NodeData};
use crate::graph::node::{Node, NodeStatistics};

const RESERVED_IDENTIFIERS: [&str; 2] = ["user", "graph"];

impl Graph {
    /// Creates a node of the registered type and adds it to the graph.
    /// Without an identifier, `"<type> <counter>"` is generated.
    pub fn add_node(
        &mut self,
        type_name: &str,
        identifier: Option<&str>,
    ) -> Result<String, GraphError> {
        let node = self.registry.create(type_name)?;
        self.add_node_object(type_name, node, identifier)
    }

    /// Adds a caller-constructed node. `type_name` is recorded for
    /// serialization; it does not have to be registered.
    pub fn add_node_object(
        &mut self,
        type_name: &str,
        node: Box<dyn Node>,
        identifier: Option<&str>,
    ) -> Result<String, GraphError> {
        let identifier = match identifier {
            Some(identifier) => {
                if identifier.is_empty() {
                    return Err(GraphError::EmptyIdentifier);
                }
                if RESERVED_IDENTIFIERS.contains(&identifier) {
                    return Err(GraphError::ReservedIdentifier(identifier.to_string()));
                }
                if self.node_for_identifier.contains_key(identifier) {
                    return Err(GraphError::DuplicateIdentifier(identifier.to_string()));
                }
                identifier.to_string()
            }
            None => {
                let mut counter = 0u32;
                loop {
                    let candidate = format!("{type_name} {counter}");
                    if !self.node_for_identifier.contains_key(&candidate) {
                        break candidate;
                    }
                    counter += 1;
                }
            }
        };

        let inputs = node.describe_inputs();
        for (j, input) in inputs.iter().enumerate() {
            if inputs[..j].iter().any(|other| other.name() == input.name()) {
                return Err(GraphError::Connector(format!(
                    "node '{}' declares two inputs named '{}'",
                    identifier,
                    input.name()
                )));
            }
        }

        let id = self.nodes.insert(NodeData {
            node: Some(node),
            identifier: identifier.clone(),
            type_name: type_name.to_string(),
            user_disabled: false,
            disabled: false,
            errors: Vec::new(),
            stats: NodeStatistics::default(),
            inputs,
            desired_incoming: BTreeMap::new(),
            desired_outgoing: Default::default(),
            build: None,
        });
        self.node_for_identifier.insert(identifier.clone(), id);
        self.needs_rebuild = true;
        debug!(node = %identifier, type_name, "added node");
        Ok(identifier)
    }

    /// Schedules removal of a node. Returns false if the identifier is
    /// unknown. During a run the removal happens after the current
    /// iteration's submit; in-flight work is always drained first.
    pub fn remove_node(&mut self, identifier: &str) -> bool {
        if !self.node_for_identifier.contains_key(identifier) {
            return false;
        }
        if self.run_in_progress {
            debug!(node = %identifier, "scheduling node removal for the end of the run");
            self.deferred
                .push(DeferredEdit::RemoveNode(identifier.to_string()));
        } else {
            self.remove_node_now(identifier);
        }
        true
    }

    pub(crate) fn remove_node_now(&mut self, identifier: &str) {
        let Some(&id) = self.node_for_identifier.get(identifier) else {
            return;
        };
        self.wait();

        let outgoing: Vec<_> = self.nodes[id].desired_outgoing.iter().cloned().collect();
        for (_, dst_ident, dst_input) in outgoing {
            self.remove_connection(identifier, &dst_ident, &dst_input);
        }
        let incoming: Vec<_> = self
            .nodes[id]
            .desired_incoming
            .iter()
            .map(|(dst_input, (src, _))| (src.clone(), dst_input.clone()))
            .collect();
        for (src_ident, dst_input) in incoming {
            self.remove_connection(&src_ident, identifier, &dst_input);
        }

        for slot in &self.ring {
            slot.user_data.lock().remove(identifier);
        }

        let data = self.nodes.remove(id);
        self.node_for_identifier.remove(identifier);
        self.needs_rebuild = true;
        debug!(
            node = %identifier,
            type_name = %data.map(|d| d.type_name).unwrap_or_default(),
            "removed node"
        );
    }

    /// Connects `src_output` of `src` to `dst_input` of `dst`. A connection
    /// already bound to `dst_input` is removed first. The output name is
    /// validated at build time (outputs are not known until then).
    pub fn add_connection(
        &mut self,
        src: &str,
        dst: &str,
        src_output: &str,
        dst_input: &str,
    ) -> Result<(), GraphError> {
        let Some(&src_id) = self.node_for_identifier.get(src) else {
            return Err(GraphError::UnknownNode(src.to_string()));
        };
        let Some(&dst_id) = self.node_for_identifier.get(dst) else {
            return Err(GraphError::UnknownNode(dst.to_string()));
        };
        if !self.nodes[dst_id]
            .inputs
            .iter()
            .any(|input| input.name() == dst_input)
        {
            return Err(GraphError::InvalidConnection(format!(
                "node '{dst}' has no input '{dst_input}'"
            )));
        }

        if let Some((old_src, old_output)) = self.nodes[dst_id].desired_incoming.get(dst_input) {
            let (old_src, old_output) = (old_src.clone(), old_output.clone());
            debug!(
                "replacing connection {}.{} -> {}.{}",
                old_src, old_output, dst, dst_input
            );
            self.remove_connection(&old_src, dst, dst_input);
        }

        self.nodes[src_id].desired_outgoing.insert((
            src_output.to_string(),
            dst.to_string(),
            dst_input.to_string(),
        ));
        self.nodes[dst_id]
            .desired_incoming
            .insert(dst_input.to_string(), (src.to_string(), src_output.to_string()));

        self.needs_rebuild = true;
        debug!("added connection {}.{} -> {}.{}", src, src_output, dst, dst_input);
        Ok(())
    }

    /// Removes the connection feeding `dst_input` of `dst`. Returns false if
    /// no such connection exists.
    pub fn remove_connection(&mut self, src: &str, dst: &str, dst_input: &str) -> bool {
        let (Some(&src_id), Some(&dst_id)) = (
            self.node_for_identifier.get(src),
            self.node_for_identifier.get(dst),
        ) else {
            warn!(
                "cannot remove connection {}.? -> {}.{}: unknown node",
                src, dst, dst_input
            );
            return false;
        };

        let Some((stored_src, src_output)) = self.nodes[dst_id].desired_incoming.get(dst_input)
        else {
            warn!(
                "connection {} -> {}.{} does not exist and cannot be removed",
                src, dst, dst_input
            );
            return false;
        };
        if stored_src != src {
            warn!(
                "input {}.{} is fed by '{}', not '{}'",
                dst, dst_input, stored_src, src
            );
            return false;
        }
        let src_output = src_output.clone();

        self.nodes[dst_id].desired_incoming.remove(dst_input);
        self.nodes[src_id].desired_outgoing.remove(&(
            src_output.clone(),
            dst.to_string(),
            dst_input.to_string(),
        ));
        self.needs_rebuild = true;
        debug!("removed connection {}.{} -> {}.{}", src, src_output, dst, dst_input);
        true
    }

    /// Sets the user-controlled disable flag of a node.
    pub fn set_node_disabled(&mut self, identifier: &str, disabled: bool) -> bool {
        let Some(&id) = self.node_for_identifier.get(identifier) else {
            return false;
        };
        if self.nodes[id].user_disabled != disabled {
            self.nodes[id].user_disabled = disabled;
            self.needs_rebuild = true;
        }
        true
    }
}

//! Declarative routing table.
//!
//! The transition matrix is data, not dispatch code: a list of
//! `(from, condition, to)` rows scanned in order, first matching row wins.
//! New nodes extend the table instead of modifying the scheduler. Tables are
//! loadable from YAML and validated as a directed graph before use.

use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SwitchboardError};
use crate::state::SessionState;

pub const NODE_CLASSIFY: &str = "classify";
pub const NODE_RESPOND: &str = "respond";
pub const NODE_APPROVE: &str = "approve";
pub const NODE_EXECUTE: &str = "execute_capabilities";

/// Entry node for every inbound message.
pub const ENTRY_NODE: &str = NODE_CLASSIFY;

const TERMINAL: &str = "terminal";

/// Edge predicate, a pure function of session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    Always,
    /// Escalation flag is set
    EscalationSet,
    /// The responder left at least one capability request pending
    PendingRequests,
    /// The approval decision declined the batch this cycle
    RejectionInjected,
    /// Fallback row, matches unconditionally; place last for its `from` node
    Otherwise,
}

impl EdgeCondition {
    pub fn holds(&self, state: &SessionState) -> bool {
        match self {
            EdgeCondition::Always | EdgeCondition::Otherwise => true,
            EdgeCondition::EscalationSet => state.needs_escalation,
            EdgeCondition::PendingRequests => !state.pending_requests.is_empty(),
            EdgeCondition::RejectionInjected => state.approval_rejected,
        }
    }
}

/// Where an edge leads. The name `terminal` is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    Node(String),
    Terminal,
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        if s == TERMINAL {
            Target::Terminal
        } else {
            Target::Node(s)
        }
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        match t {
            Target::Node(name) => name,
            Target::Terminal => TERMINAL.to_string(),
        }
    }
}

/// One row of the transition matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub when: EdgeCondition,
    pub to: Target,
}

impl Transition {
    fn new(from: &str, when: EdgeCondition, to: Target) -> Self {
        Self {
            from: from.to_string(),
            when,
            to,
        }
    }
}

/// The full routing table for the conversation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    pub transitions: Vec<Transition>,
}

impl Default for RoutingTable {
    /// The built-in conversation flow.
    fn default() -> Self {
        use EdgeCondition::*;
        let node = |n: &str| Target::Node(n.to_string());
        Self {
            transitions: vec![
                Transition::new(NODE_CLASSIFY, Always, node(NODE_RESPOND)),
                Transition::new(NODE_RESPOND, EscalationSet, Target::Terminal),
                Transition::new(NODE_RESPOND, PendingRequests, node(NODE_APPROVE)),
                Transition::new(NODE_RESPOND, Otherwise, Target::Terminal),
                Transition::new(NODE_APPROVE, RejectionInjected, node(NODE_RESPOND)),
                Transition::new(NODE_APPROVE, Otherwise, node(NODE_EXECUTE)),
                Transition::new(NODE_EXECUTE, Always, node(NODE_RESPOND)),
            ],
        }
    }
}

impl RoutingTable {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: RoutingTable = serde_yaml::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    /// Resolve the successor of `from` against the current state.
    pub fn next(&self, from: &str, state: &SessionState) -> Result<&Target> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.when.holds(state))
            .map(|t| &t.to)
            .ok_or_else(|| {
                SwitchboardError::routing(format!("no transition matches from node '{}'", from))
            })
    }

    /// Structural validation: every edge target is a known node, and every
    /// node is reachable from the entry node.
    pub fn validate(&self) -> Result<()> {
        if self.transitions.is_empty() {
            return Err(SwitchboardError::routing("routing table is empty"));
        }

        let known: HashSet<&str> = self.transitions.iter().map(|t| t.from.as_str()).collect();
        if !known.contains(ENTRY_NODE) {
            return Err(SwitchboardError::routing(format!(
                "entry node '{}' has no outgoing transitions",
                ENTRY_NODE
            )));
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices = HashMap::new();
        for name in &known {
            indices.insert(*name, graph.add_node(*name));
        }
        for t in &self.transitions {
            if let Target::Node(to) = &t.to {
                let to_idx = *indices.get(to.as_str()).ok_or_else(|| {
                    SwitchboardError::routing(format!(
                        "transition from '{}' targets unknown node '{}'",
                        t.from, to
                    ))
                })?;
                graph.add_edge(indices[t.from.as_str()], to_idx, ());
            }
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, indices[ENTRY_NODE]);
        while let Some(idx) = dfs.next(&graph) {
            reached.insert(graph[idx]);
        }
        for name in &known {
            if !reached.contains(name) {
                return Err(SwitchboardError::routing(format!(
                    "node '{}' is unreachable from '{}'",
                    name, ENTRY_NODE
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::CapabilityRequest;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_default_table_is_valid() {
        RoutingTable::default().validate().unwrap();
    }

    #[test]
    fn test_classify_always_routes_to_respond() {
        let table = RoutingTable::default();
        let state = SessionState::new("t");
        assert_eq!(
            table.next(NODE_CLASSIFY, &state).unwrap(),
            &Target::Node(NODE_RESPOND.to_string())
        );
    }

    #[test]
    fn test_respond_routing_precedence() {
        let table = RoutingTable::default();

        let mut state = SessionState::new("t");
        assert_eq!(table.next(NODE_RESPOND, &state).unwrap(), &Target::Terminal);

        state.pending_requests =
            vec![CapabilityRequest::new("shipping_trackShipment", json!({}))];
        assert_eq!(
            table.next(NODE_RESPOND, &state).unwrap(),
            &Target::Node(NODE_APPROVE.to_string())
        );

        // Escalation outranks pending requests.
        state.escalate(crate::state::EscalationReason::CustomerRequest);
        assert_eq!(table.next(NODE_RESPOND, &state).unwrap(), &Target::Terminal);
    }

    #[test]
    fn test_approve_routes_rejection_back_to_respond() {
        let table = RoutingTable::default();
        let mut state = SessionState::new("t");
        assert_eq!(
            table.next(NODE_APPROVE, &state).unwrap(),
            &Target::Node(NODE_EXECUTE.to_string())
        );
        state.approval_rejected = true;
        assert_eq!(
            table.next(NODE_APPROVE, &state).unwrap(),
            &Target::Node(NODE_RESPOND.to_string())
        );
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "
transitions:
  - { from: classify, when: always, to: respond }
  - { from: respond, when: escalation_set, to: terminal }
  - { from: respond, when: otherwise, to: terminal }
";
        let table = RoutingTable::from_yaml(yaml).unwrap();
        assert_eq!(table.transitions.len(), 3);
        assert_eq!(table.transitions[1].to, Target::Terminal);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let yaml = "
transitions:
  - { from: classify, when: always, to: nowhere }
";
        assert!(RoutingTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let yaml = "
transitions:
  - { from: classify, when: always, to: terminal }
  - { from: orphan, when: always, to: terminal }
";
        assert!(RoutingTable::from_yaml(yaml).is_err());
    }
}

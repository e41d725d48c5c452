use crate::error::SimError;
use petgraph::algo::{dijkstra, has_path_connecting};
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Privilege held on the target, in escalation order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    None,
    Public,
    Internal,
    Admin,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 4] = [
        AccessLevel::None,
        AccessLevel::Public,
        AccessLevel::Internal,
        AccessLevel::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Public => "public",
            AccessLevel::Internal => "internal",
            AccessLevel::Admin => "admin",
        }
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of abstract attack actions.
///
/// Declaration order is the fixed priority order used to break ties between
/// equally valued actions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum AttackAction {
    PublicAccessAttempt,
    AuthBypassAttempt,
    SqlInjectionAttempt,
    XssAttempt,
    TokenReuseAttempt,
    SessionHijackAttempt,
    PathTraversalAttempt,
    CommandInjectionAttempt,
    PrivilegeEscalationAttempt,
    LateralMovementAttempt,
}

/// A single step in the escalation graph
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationEdge {
    pub from: AccessLevel,
    pub to: AccessLevel,
    /// Probability that a successful action actually takes this edge.
    /// Level-skipping edges carry a low chance.
    pub chance: f64,
    /// Logical component reached when the edge is taken
    pub component: &'static str,
}

const fn edge(
    from: AccessLevel,
    to: AccessLevel,
    chance: f64,
    component: &'static str,
) -> EscalationEdge {
    EscalationEdge {
        from,
        to,
        chance,
        component,
    }
}

use AccessLevel::{Admin, Internal, Public};

const PUBLIC_ACCESS_EDGES: &[EscalationEdge] =
    &[edge(AccessLevel::None, Public, 1.0, "web-frontend")];
const AUTH_BYPASS_EDGES: &[EscalationEdge] = &[
    edge(AccessLevel::None, Public, 1.0, "login-portal"),
    edge(Public, Internal, 1.0, "auth-service"),
];
const SQL_INJECTION_EDGES: &[EscalationEdge] = &[
    edge(Public, Internal, 1.0, "database"),
    edge(AccessLevel::None, Internal, 0.2, "database"),
];
const TOKEN_REUSE_EDGES: &[EscalationEdge] = &[edge(Public, Internal, 1.0, "auth-service")];
const SESSION_HIJACK_EDGES: &[EscalationEdge] = &[
    edge(Public, Internal, 1.0, "user-session"),
    edge(Internal, Admin, 1.0, "admin-panel"),
];
const PATH_TRAVERSAL_EDGES: &[EscalationEdge] = &[
    edge(AccessLevel::None, Public, 1.0, "static-files"),
    edge(Public, Internal, 1.0, "config-store"),
];
const COMMAND_INJECTION_EDGES: &[EscalationEdge] = &[
    edge(Internal, Admin, 1.0, "app-server"),
    edge(Public, Admin, 0.1, "app-server"),
];
const PRIVILEGE_ESCALATION_EDGES: &[EscalationEdge] =
    &[edge(Internal, Admin, 1.0, "admin-panel")];
const LATERAL_MOVEMENT_EDGES: &[EscalationEdge] =
    &[edge(Public, Internal, 1.0, "internal-api")];

/// Something revealed by a successful action
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Discovery {
    Service(String),
    Vulnerability(String),
    Component(String),
}

impl Discovery {
    pub fn id(&self) -> &str {
        match self {
            Discovery::Service(id) | Discovery::Vulnerability(id) | Discovery::Component(id) => id,
        }
    }
}

impl AttackAction {
    pub const ALL: [AttackAction; 10] = [
        AttackAction::PublicAccessAttempt,
        AttackAction::AuthBypassAttempt,
        AttackAction::SqlInjectionAttempt,
        AttackAction::XssAttempt,
        AttackAction::TokenReuseAttempt,
        AttackAction::SessionHijackAttempt,
        AttackAction::PathTraversalAttempt,
        AttackAction::CommandInjectionAttempt,
        AttackAction::PrivilegeEscalationAttempt,
        AttackAction::LateralMovementAttempt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackAction::PublicAccessAttempt => "public-access-attempt",
            AttackAction::AuthBypassAttempt => "auth-bypass-attempt",
            AttackAction::SqlInjectionAttempt => "sql-injection-attempt",
            AttackAction::XssAttempt => "xss-attempt",
            AttackAction::TokenReuseAttempt => "token-reuse-attempt",
            AttackAction::SessionHijackAttempt => "session-hijack-attempt",
            AttackAction::PathTraversalAttempt => "path-traversal-attempt",
            AttackAction::CommandInjectionAttempt => "command-injection-attempt",
            AttackAction::PrivilegeEscalationAttempt => "privilege-escalation-attempt",
            AttackAction::LateralMovementAttempt => "lateral-movement-attempt",
        }
    }

    /// Position in the fixed priority order
    pub fn priority(&self) -> usize {
        *self as usize
    }

    /// Static chance that the action succeeds, before any hint bonus
    pub fn base_success_probability(&self) -> f64 {
        match self {
            AttackAction::PublicAccessAttempt => 0.30,
            AttackAction::AuthBypassAttempt => 0.10,
            AttackAction::SqlInjectionAttempt => 0.15,
            AttackAction::XssAttempt => 0.30,
            AttackAction::TokenReuseAttempt => 0.25,
            AttackAction::SessionHijackAttempt => 0.20,
            AttackAction::PathTraversalAttempt => 0.20,
            AttackAction::CommandInjectionAttempt => 0.15,
            AttackAction::PrivilegeEscalationAttempt => 0.20,
            AttackAction::LateralMovementAttempt => 0.30,
        }
    }

    pub fn escalations(&self) -> &'static [EscalationEdge] {
        match self {
            AttackAction::PublicAccessAttempt => PUBLIC_ACCESS_EDGES,
            AttackAction::AuthBypassAttempt => AUTH_BYPASS_EDGES,
            AttackAction::SqlInjectionAttempt => SQL_INJECTION_EDGES,
            AttackAction::XssAttempt => &[],
            AttackAction::TokenReuseAttempt => TOKEN_REUSE_EDGES,
            AttackAction::SessionHijackAttempt => SESSION_HIJACK_EDGES,
            AttackAction::PathTraversalAttempt => PATH_TRAVERSAL_EDGES,
            AttackAction::CommandInjectionAttempt => COMMAND_INJECTION_EDGES,
            AttackAction::PrivilegeEscalationAttempt => PRIVILEGE_ESCALATION_EDGES,
            AttackAction::LateralMovementAttempt => LATERAL_MOVEMENT_EDGES,
        }
    }

    /// Escalation edge available from `level`, if any
    pub fn escalation_from(&self, level: AccessLevel) -> Option<&'static EscalationEdge> {
        self.escalations().iter().find(|e| e.from == level)
    }

    /// Fixed discovery table entry for a success at `level`
    pub fn discovery_at(&self, level: AccessLevel) -> Option<Discovery> {
        let vuln = |id: &str| Some(Discovery::Vulnerability(id.to_string()));
        let service = |id: &str| Some(Discovery::Service(id.to_string()));

        match (self, level) {
            (AttackAction::SqlInjectionAttempt, _) => vuln("sql-injection"),
            (AttackAction::XssAttempt, _) => vuln("cross-site-scripting"),
            (AttackAction::PathTraversalAttempt, _) => vuln("path-traversal"),
            (AttackAction::CommandInjectionAttempt, _) => vuln("command-injection"),
            (AttackAction::PrivilegeEscalationAttempt, Internal) => vuln("misconfigured-sudo"),
            (AttackAction::PublicAccessAttempt, AccessLevel::None) => service("nginx-1.18.0"),
            (AttackAction::AuthBypassAttempt, AccessLevel::None) => service("mysql-5.7.33"),
            (AttackAction::TokenReuseAttempt, Public) => service("jwt-auth-service"),
            (AttackAction::SessionHijackAttempt, Public) => service("session-store"),
            (AttackAction::LateralMovementAttempt, Internal) => service("redis-6.0.9"),
            (AttackAction::LateralMovementAttempt, Admin) => service("postgresql-13.2"),
            _ => None,
        }
    }
}

impl fmt::Display for AttackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackAction {
    type Err = SimError;

    /// Accepts kebab-case or snake_case tags
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        if normalized == "authentication-bypass-attempt" {
            return Ok(AttackAction::AuthBypassAttempt);
        }

        AttackAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| SimError::InvalidAction(s.to_string()))
    }
}

/// Directed graph over access levels, one edge per (from, to) pair carrying
/// the actions able to take it
pub struct EscalationGraph {
    graph: DiGraphMap<AccessLevel, Vec<AttackAction>>,
}

impl EscalationGraph {
    pub fn new() -> Self {
        let mut graph: DiGraphMap<AccessLevel, Vec<AttackAction>> = DiGraphMap::new();
        for level in AccessLevel::ALL {
            graph.add_node(level);
        }

        for action in AttackAction::ALL {
            for e in action.escalations() {
                match graph.edge_weight_mut(e.from, e.to) {
                    Some(actions) => actions.push(action),
                    None => {
                        graph.add_edge(e.from, e.to, vec![action]);
                    }
                }
            }
        }

        Self { graph }
    }

    pub fn can_reach(&self, from: AccessLevel, to: AccessLevel) -> bool {
        from == to || has_path_connecting(&self.graph, from, to, None)
    }

    /// Fewest successful escalations needed to get from `from` to `to`
    pub fn min_steps(&self, from: AccessLevel, to: AccessLevel) -> Option<usize> {
        dijkstra(&self.graph, from, Some(to), |_| 1usize)
            .get(&to)
            .copied()
    }

    pub fn actions_between(&self, from: AccessLevel, to: AccessLevel) -> &[AttackAction] {
        self.graph
            .edge_weight(from, to)
            .map(|actions| actions.as_slice())
            .unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl Default for EscalationGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::None < AccessLevel::Public);
        assert!(AccessLevel::Public < AccessLevel::Internal);
        assert!(AccessLevel::Internal < AccessLevel::Admin);
        assert_eq!(AccessLevel::Admin.rank(), 3);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            "path-traversal-attempt".parse::<AttackAction>().unwrap(),
            AttackAction::PathTraversalAttempt
        );
        assert_eq!(
            "sql_injection_attempt".parse::<AttackAction>().unwrap(),
            AttackAction::SqlInjectionAttempt
        );
        assert_eq!(
            "authentication_bypass_attempt".parse::<AttackAction>().unwrap(),
            AttackAction::AuthBypassAttempt
        );
        assert!(matches!(
            "ssrf-attempt".parse::<AttackAction>(),
            Err(SimError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_action_serde_tag() {
        let json = serde_json::to_string(&AttackAction::XssAttempt).unwrap();
        assert_eq!(json, "\"xss-attempt\"");
        let level = serde_json::to_string(&AccessLevel::Internal).unwrap();
        assert_eq!(level, "\"internal\"");
    }

    #[test]
    fn test_probability_table() {
        for action in AttackAction::ALL {
            let p = action.base_success_probability();
            assert!(p > 0.0 && p < 1.0, "{} has {}", action, p);
        }
    }

    #[test]
    fn test_edges_only_go_up() {
        for action in AttackAction::ALL {
            for e in action.escalations() {
                assert!(e.from < e.to);
                assert!(e.chance > 0.0 && e.chance <= 1.0);
            }
        }
    }

    #[test]
    fn test_escalation_graph() {
        let graph = EscalationGraph::new();

        assert!(graph.can_reach(AccessLevel::None, AccessLevel::Admin));
        assert!(!graph.can_reach(AccessLevel::Admin, AccessLevel::None));
        // None -> Internal (sql skip) -> Admin
        assert_eq!(graph.min_steps(AccessLevel::None, AccessLevel::Admin), Some(2));
        assert_eq!(graph.min_steps(AccessLevel::Public, AccessLevel::Internal), Some(1));
        assert!(graph
            .actions_between(AccessLevel::Internal, AccessLevel::Admin)
            .contains(&AttackAction::PrivilegeEscalationAttempt));
    }

    #[test]
    fn test_discovery_table() {
        assert_eq!(
            AttackAction::PathTraversalAttempt.discovery_at(AccessLevel::None),
            Some(Discovery::Vulnerability("path-traversal".to_string()))
        );
        assert_eq!(
            AttackAction::LateralMovementAttempt.discovery_at(AccessLevel::Internal),
            Some(Discovery::Service("redis-6.0.9".to_string()))
        );
        assert_eq!(AttackAction::TokenReuseAttempt.discovery_at(AccessLevel::Admin), None);
    }
}

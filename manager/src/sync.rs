//! Rule Synchronizer: keeps the rule store and the OS mirror in step
//!
//! Add:    insert → port proxy → firewall
//! Remove: find → delete → port proxy → firewall
//!
//! Each sequence stops at the first failing step. Completed steps are never
//! undone, so a failure can leave a rule in one of the partial [`RuleState`]s;
//! the error says which one and the operator cleans up with netsh.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mirror::{MirrorError, NetworkMirror};
use crate::rule::{check_name, NewRule, Rule, RuleError};
use crate::store::{RuleStore, StoreError};

/// Where a rule stands across the store and the two OS tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    /// Nowhere
    Absent,
    /// Stored, no OS entries
    StoreOnly,
    /// Stored and forwarded, no firewall rule
    StoreAndForward,
    /// Stored, forwarded and allowed through the firewall
    Active,
    /// Store record gone, both OS entries still present
    Detached,
    /// Only the firewall rule is left
    FirewallOnly,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::StoreOnly => "stored without OS entries",
            Self::StoreAndForward => "stored and forwarded without firewall rule",
            Self::Active => "active",
            Self::Detached => "OS entries without store record",
            Self::FirewallOnly => "firewall rule without store record or port proxy",
        };
        f.write_str(s)
    }
}

/// Store step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStep {
    Insert,
    Find,
    Delete,
}

impl fmt::Display for StoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Insert => "failed to save rule to database",
            Self::Find => "failed to find rule in database",
            Self::Delete => "failed to remove rule from database",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid rule: {0}")]
    InvalidRule(#[from] RuleError),

    #[error("failed to find rule in database: no rule named '{0}'")]
    NotFound(String),

    #[error("{step}: {source}")]
    Store {
        step: StoreStep,
        #[source]
        source: StoreError,
    },

    #[error("{source}")]
    Mirror {
        stalled_at: RuleState,
        #[source]
        source: MirrorError,
    },
}

impl SyncError {
    /// State the rule was left in, when the sequence stopped part-way
    pub fn stalled_at(&self) -> Option<RuleState> {
        match self {
            Self::Mirror { stalled_at, .. } => Some(*stalled_at),
            _ => None,
        }
    }

    fn store(step: StoreStep) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { step, source }
    }

    fn mirror(stalled_at: RuleState) -> impl FnOnce(MirrorError) -> Self {
        move |source| Self::Mirror { stalled_at, source }
    }
}

/// Runs the add and remove sequences against a store and a mirror
pub struct RuleSynchronizer {
    store: Arc<RuleStore>,
    mirror: Arc<dyn NetworkMirror>,
}

impl RuleSynchronizer {
    pub fn new(store: Arc<RuleStore>, mirror: Arc<dyn NetworkMirror>) -> Self {
        Self { store, mirror }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn mirror(&self) -> &dyn NetworkMirror {
        self.mirror.as_ref()
    }

    /// Store the rule, then forward its listen endpoint, then open the firewall.
    pub fn add(&self, rule: NewRule) -> Result<Rule, SyncError> {
        let rule = rule.validate()?;

        let id = self
            .store
            .insert(&rule)
            .map_err(SyncError::store(StoreStep::Insert))?;
        let rule = rule.with_id(id);
        debug!(rule = %rule.name, id, "Rule stored");

        self.mirror
            .add_port_forward(
                &rule.listen_address,
                &rule.listen_port,
                &rule.connect_address,
                &rule.connect_port,
            )
            .map_err(SyncError::mirror(RuleState::StoreOnly))
            .inspect_err(|e| stalled("add", &rule.name, e))?;
        debug!(rule = %rule.name, "Port proxy added");

        self.mirror
            .add_firewall_allow(&rule.name, &rule.listen_port)
            .map_err(SyncError::mirror(RuleState::StoreAndForward))
            .inspect_err(|e| stalled("add", &rule.name, e))?;

        info!(
            "Added rule '{}': {}:{} -> {}:{}",
            rule.name, rule.listen_address, rule.listen_port, rule.connect_address, rule.connect_port
        );
        Ok(rule)
    }

    /// Look the rule up, drop it from the store, then tear down its OS entries.
    pub fn remove(&self, name: &str) -> Result<Rule, SyncError> {
        let name = check_name(name.trim())?;
        let name = name.as_str();

        let rule = self
            .store
            .find_by_name(name)
            .map_err(SyncError::store(StoreStep::Find))?
            .ok_or_else(|| SyncError::NotFound(name.to_string()))?;

        let removed = self
            .store
            .delete_by_name(name)
            .map_err(SyncError::store(StoreStep::Delete))?;
        if removed == 0 {
            // A concurrent remove got here first; carry on like netsh would be asked to anyway
            warn!(rule = %name, "Rule vanished from the store before it could be deleted");
        } else {
            debug!(rule = %name, id = rule.id, "Rule deleted from store");
        }

        self.mirror
            .remove_port_forward(&rule.listen_address, &rule.listen_port)
            .map_err(SyncError::mirror(RuleState::Detached))
            .inspect_err(|e| stalled("remove", &rule.name, e))?;
        debug!(rule = %name, "Port proxy removed");

        self.mirror
            .remove_firewall_allow(&rule.name)
            .map_err(SyncError::mirror(RuleState::FirewallOnly))
            .inspect_err(|e| stalled("remove", &rule.name, e))?;

        info!(
            "Removed rule '{}' ({}:{})",
            rule.name, rule.listen_address, rule.listen_port
        );
        Ok(rule)
    }

    pub fn list(&self) -> Result<Vec<Rule>, StoreError> {
        self.store.list_all()
    }
}

fn stalled(op: &str, name: &str, err: &SyncError) {
    if let Some(state) = err.stalled_at() {
        warn!(rule = %name, "{op} stopped part-way, rule left {state}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{MirrorCall, MirrorErrorKind, RecordingMirror};

    fn setup() -> (RuleSynchronizer, Arc<RecordingMirror>) {
        let store = Arc::new(RuleStore::open_in_memory().unwrap());
        let mirror = Arc::new(RecordingMirror::new());
        (RuleSynchronizer::new(store, mirror.clone()), mirror)
    }

    fn web() -> NewRule {
        NewRule::new("web", "0.0.0.0", "8080", "10.0.0.5", "80")
    }

    #[test]
    fn test_add_creates_all_three() {
        let (sync, mirror) = setup();
        let rule = sync.add(web()).unwrap();

        let rules = sync.list().unwrap();
        assert_eq!(rules, vec![rule.clone()]);
        assert_eq!(
            mirror.port_forward("0.0.0.0", "8080"),
            Some(("10.0.0.5".to_string(), "80".to_string()))
        );
        assert_eq!(mirror.firewall_ports("web"), vec!["8080"]);
    }

    #[test]
    fn test_add_call_order() {
        let (sync, mirror) = setup();
        sync.add(web()).unwrap();

        assert_eq!(
            mirror.calls(),
            vec![
                MirrorCall::AddPortForward {
                    listen_addr: "0.0.0.0".into(),
                    listen_port: "8080".into(),
                    connect_addr: "10.0.0.5".into(),
                    connect_port: "80".into(),
                },
                MirrorCall::AddFirewallAllow {
                    rule_name: "web".into(),
                    listen_port: "8080".into(),
                },
            ]
        );
    }

    #[test]
    fn test_remove_deletes_all_three() {
        let (sync, mirror) = setup();
        sync.add(web()).unwrap();

        let removed = sync.remove("web").unwrap();
        assert_eq!(removed.name, "web");
        assert!(sync.list().unwrap().is_empty());
        assert!(mirror.port_forward("0.0.0.0", "8080").is_none());
        assert!(mirror.firewall_ports("web").is_empty());
    }

    #[test]
    fn test_remove_uses_stored_endpoint() {
        let (sync, mirror) = setup();
        sync.add(NewRule::new("rdp", "192.168.1.10", "13389", "10.0.0.9", "3389"))
            .unwrap();
        sync.remove("rdp").unwrap();

        let calls = mirror.calls();
        assert_eq!(
            calls[2],
            MirrorCall::RemovePortForward {
                listen_addr: "192.168.1.10".into(),
                listen_port: "13389".into(),
            }
        );
        assert_eq!(
            calls[3],
            MirrorCall::RemoveFirewallAllow {
                rule_name: "rdp".into()
            }
        );
    }

    #[test]
    fn test_port_forward_failure_leaves_store_only() {
        let (sync, mirror) = setup();
        mirror.fail_on(MirrorErrorKind::PortProxyAddFailed);

        let err = sync.add(web()).unwrap_err();
        assert_eq!(err.stalled_at(), Some(RuleState::StoreOnly));
        assert!(err.to_string().starts_with("failed to add port proxy"));

        // Rule is still stored and the firewall was never asked
        assert_eq!(sync.list().unwrap().len(), 1);
        assert_eq!(mirror.calls().len(), 1);
        assert_eq!(mirror.firewall_rule_count(), 0);
    }

    #[test]
    fn test_firewall_failure_leaves_store_and_forward() {
        let (sync, mirror) = setup();
        mirror.fail_on(MirrorErrorKind::FirewallAddFailed);

        let err = sync.add(web()).unwrap_err();
        assert_eq!(err.stalled_at(), Some(RuleState::StoreAndForward));
        assert_eq!(sync.list().unwrap().len(), 1);
        assert!(mirror.port_forward("0.0.0.0", "8080").is_some());
        assert_eq!(mirror.firewall_rule_count(), 0);
    }

    #[test]
    fn test_remove_firewall_failure_orphans_firewall_rule() {
        let (sync, mirror) = setup();
        sync.add(web()).unwrap();
        mirror.fail_on(MirrorErrorKind::FirewallRemoveFailed);

        let err = sync.remove("web").unwrap_err();
        assert_eq!(err.stalled_at(), Some(RuleState::FirewallOnly));
        assert!(sync.list().unwrap().is_empty());
        assert!(mirror.port_forward("0.0.0.0", "8080").is_none());
        assert_eq!(mirror.firewall_ports("web"), vec!["8080"]);
    }

    #[test]
    fn test_remove_port_forward_failure_skips_firewall() {
        let (sync, mirror) = setup();
        sync.add(web()).unwrap();
        mirror.fail_on(MirrorErrorKind::PortProxyRemoveFailed);

        let err = sync.remove("web").unwrap_err();
        assert_eq!(err.stalled_at(), Some(RuleState::Detached));
        assert!(sync.list().unwrap().is_empty());
        assert!(mirror.port_forward("0.0.0.0", "8080").is_some());
        assert_eq!(mirror.firewall_ports("web"), vec!["8080"]);
        // add, add, remove forward; the firewall removal was never attempted
        assert_eq!(mirror.calls().len(), 3);
    }

    #[test]
    fn test_remove_unknown_touches_nothing() {
        let (sync, mirror) = setup();
        let err = sync.remove("ghost").unwrap_err();
        assert!(matches!(err, SyncError::NotFound(ref n) if n == "ghost"));
        assert!(err.stalled_at().is_none());
        assert!(mirror.calls().is_empty());
    }

    #[test]
    fn test_remove_empty_name_rejected() {
        let (sync, mirror) = setup();
        sync.add(web()).unwrap();
        let err = sync.remove("  ").unwrap_err();
        assert!(matches!(err, SyncError::InvalidRule(RuleError::EmptyName)));
        assert_eq!(sync.list().unwrap().len(), 1);
        assert_eq!(mirror.calls().len(), 2);
    }

    #[test]
    fn test_invalid_rule_touches_nothing() {
        let (sync, mirror) = setup();
        let err = sync
            .add(NewRule::new("web", "0.0.0.0", "eighty", "10.0.0.5", "80"))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRule(RuleError::InvalidPort { .. })));
        assert!(sync.list().unwrap().is_empty());
        assert!(mirror.calls().is_empty());
    }

    #[test]
    fn test_duplicate_endpoint_is_stored_then_fails() {
        let (sync, mirror) = setup();
        sync.add(web()).unwrap();

        // Same listen endpoint under another name: netsh refuses, the row stays
        let err = sync
            .add(NewRule::new("web2", "0.0.0.0", "8080", "10.0.0.6", "80"))
            .unwrap_err();
        assert_eq!(err.stalled_at(), Some(RuleState::StoreOnly));
        assert_eq!(sync.list().unwrap().len(), 2);
        assert_eq!(mirror.firewall_rule_count(), 1);
    }

    #[test]
    fn test_duplicate_names_remove_oldest() {
        let (sync, mirror) = setup();
        sync.add(web()).unwrap();
        sync.add(NewRule::new("web", "0.0.0.0", "9090", "10.0.0.6", "80"))
            .unwrap();

        sync.remove("web").unwrap();

        let remaining = sync.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].listen_port, "9090");
        assert!(mirror.port_forward("0.0.0.0", "8080").is_none());
        assert!(mirror.port_forward("0.0.0.0", "9090").is_some());
        // netsh drops every firewall rule with the name, including the survivor's
        assert!(mirror.firewall_ports("web").is_empty());
    }

    /// File-backed synchronizer plus a second connection for breaking the store underneath it
    fn setup_on_disk() -> (
        RuleSynchronizer,
        Arc<RecordingMirror>,
        rusqlite::Connection,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.db");
        let store = Arc::new(RuleStore::open(&path).unwrap());
        let mirror = Arc::new(RecordingMirror::new());
        let side = rusqlite::Connection::open(&path).unwrap();
        (RuleSynchronizer::new(store, mirror.clone()), mirror, side, dir)
    }

    #[test]
    fn test_insert_failure_touches_no_mirror() {
        let (sync, mirror, side, _dir) = setup_on_disk();
        side.execute_batch(
            "CREATE TRIGGER reject_insert BEFORE INSERT ON rules
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

        let err = sync.add(web()).unwrap_err();
        assert!(matches!(err, SyncError::Store { step: StoreStep::Insert, .. }));
        assert!(err.to_string().starts_with("failed to save rule to database"));
        assert!(err.stalled_at().is_none());
        assert!(mirror.calls().is_empty());
        assert!(sync.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_failure_keeps_row_and_skips_mirror() {
        let (sync, mirror, side, _dir) = setup_on_disk();
        sync.add(web()).unwrap();
        side.execute_batch(
            "CREATE TRIGGER reject_delete BEFORE DELETE ON rules
             BEGIN SELECT RAISE(ABORT, 'locked'); END;",
        )
        .unwrap();

        let err = sync.remove("web").unwrap_err();
        assert!(matches!(err, SyncError::Store { step: StoreStep::Delete, .. }));
        assert!(err.to_string().starts_with("failed to remove rule from database"));

        // Row and both OS entries are still there; only the two add calls were made
        assert_eq!(sync.list().unwrap().len(), 1);
        assert_eq!(mirror.calls().len(), 2);
        assert!(mirror.port_forward("0.0.0.0", "8080").is_some());
        assert_eq!(mirror.firewall_ports("web"), vec!["8080"]);
    }

    #[test]
    fn test_find_failure_is_store_error() {
        let (sync, mirror, side, _dir) = setup_on_disk();
        side.execute_batch("DROP TABLE rules;").unwrap();

        let err = sync.remove("web").unwrap_err();
        assert!(matches!(err, SyncError::Store { step: StoreStep::Find, .. }));
        assert!(err.to_string().starts_with("failed to find rule in database"));
        assert!(mirror.calls().is_empty());
    }

    #[test]
    fn test_remove_reserved_name_rejected() {
        let (sync, mirror) = setup();
        let err = sync.remove("ALL").unwrap_err();
        assert!(matches!(err, SyncError::InvalidRule(RuleError::ReservedName(_))));
        assert!(mirror.calls().is_empty());
    }

    #[test]
    fn test_readd_after_remove() {
        let (sync, mirror) = setup();
        let first = sync.add(web()).unwrap();
        sync.remove("web").unwrap();
        let second = sync.add(web()).unwrap();

        assert!(second.id > first.id);
        assert_eq!(sync.list().unwrap().len(), 1);
        assert_eq!(mirror.port_forward_count(), 1);
        assert_eq!(mirror.firewall_rule_count(), 1);
    }
}

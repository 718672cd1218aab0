//! Access rule engine.
//!
//! Evaluates document operations against declarative rules. Rules are
//! matched in priority order (lower value first, first match wins); a
//! request no rule matches is denied.
//!
//! Patterns are slash-separated like document paths. `{name}` captures one
//! segment and a trailing `**` matches one or more remaining segments. List
//! requests target a collection and are matched as `collection/<any id>`, so
//! a document pattern also governs listing its collection.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::Role;
use crate::paths::Collection;

/// Who a request is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Signed-in dashboard user.
    User { uid: String, role: Role },
    /// Background runtime acting without a session.
    Runtime,
}

impl Principal {
    pub fn user(uid: &str, role: Role) -> Self {
        Self::User {
            uid: uid.to_string(),
            role,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            Self::User { uid, .. } => Some(uid),
            Self::Runtime => None,
        }
    }

    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::User { role, .. } => Some(*role),
            Self::Runtime => None,
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User { uid, role } => write!(f, "{uid} ({role})"),
            Self::Runtime => f.write_str("runtime"),
        }
    }
}

/// Concrete document operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Self; 5] = [
        Self::Get,
        Self::List,
        Self::Create,
        Self::Update,
        Self::Delete,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation selector in a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationSet {
    Get,
    List,
    Create,
    Update,
    Delete,
    /// `get` and `list`.
    Read,
    /// `create`, `update` and `delete`.
    Write,
    Any,
}

impl OperationSet {
    pub const fn includes(self, op: Operation) -> bool {
        match self {
            Self::Any => true,
            Self::Read => matches!(op, Operation::Get | Operation::List),
            Self::Write => op.is_write(),
            Self::Get => matches!(op, Operation::Get),
            Self::List => matches!(op, Operation::List),
            Self::Create => matches!(op, Operation::Create),
            Self::Update => matches!(op, Operation::Update),
            Self::Delete => matches!(op, Operation::Delete),
        }
    }
}

/// Action to take when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
    Allow,
    #[default]
    Deny,
}

/// Condition that must hold for a rule to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// A signed-in user.
    Authenticated,
    /// The runtime principal.
    Unauthenticated,
    /// The `{uid}` segment captured by the pattern is the caller's uid.
    Owner,
    RoleAtLeast { role: Role },
    /// Caller's role is below `role`; the runtime has no role and always is.
    RoleBelow { role: Role },
    /// The write changes `field` (top level) from its stored value,
    /// including by dropping it.
    FieldChanged { field: String },
    ExistingFieldEquals { field: String, value: Value },
    IncomingFieldEquals { field: String, value: Value },
    /// The incoming data carries `field` with a value other than the
    /// `{uid}` captured by the pattern.
    ForeignUidField { field: String },
}

/// Source of an access rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    #[default]
    Builtin,
    File,
}

/// Access rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRule {
    pub id: String,
    pub pattern: String,
    pub operations: Vec<OperationSet>,
    pub action: AccessAction,
    #[serde(default)]
    pub when: Vec<Condition>,
    /// Lower = evaluated earlier.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: RuleSource,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<AccessRule>,
}

/// One segment of a request path. List requests end in `AnyDoc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    AnyDoc,
}

/// A single request to be authorised.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub principal: &'a Principal,
    pub operation: Operation,
    /// Document path, or collection path for `List`.
    pub path: &'a str,
    /// Stored document, if any.
    pub existing: Option<&'a Value>,
    /// Document as it would be after the write.
    pub incoming: Option<&'a Value>,
}

/// Result of access evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDecision {
    pub action: AccessAction,
    /// ID of the rule that matched (if any).
    pub rule_id: Option<String>,
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        self.action == AccessAction::Allow
    }
}

/// Rule engine for evaluating document requests.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<AccessRule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// Create a rule engine with the built-in rules.
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    /// Create an engine with custom rules.
    pub fn with_rules(mut rules: Vec<AccessRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    /// Parse a TOML rule file (`[[rule]]` tables).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuleFile =
            toml::from_str(content).map_err(|e| Error::Rules(format!("invalid rule file: {e}")))?;
        let rules = file
            .rules
            .into_iter()
            .map(|mut r| {
                r.source = RuleSource::File;
                validate_pattern(&r.pattern).map(|()| r)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_rules(rules))
    }

    /// Load rules from a TOML file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Rules(format!("Failed to read rule file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Evaluate a request against the rules.
    pub fn evaluate(&self, request: &AccessRequest<'_>) -> AccessDecision {
        let mut segments: Vec<Segment<'_>> = request.path.split('/').map(Segment::Literal).collect();
        if request.operation == Operation::List {
            segments.push(Segment::AnyDoc);
        }

        for rule in &self.rules {
            if !rule.operations.iter().any(|o| o.includes(request.operation)) {
                continue;
            }
            let Some(captures) = match_pattern(&rule.pattern, &segments) else {
                continue;
            };
            if rule
                .when
                .iter()
                .all(|c| condition_holds(c, request, &captures))
            {
                return AccessDecision {
                    action: rule.action,
                    rule_id: Some(rule.id.clone()),
                    reason: rule.description.clone(),
                };
            }
        }
        AccessDecision {
            action: AccessAction::Deny,
            rule_id: None,
            reason: Some("no rule matched".to_string()),
        }
    }

    /// Get all rules.
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }
}

fn validate_pattern(pattern: &str) -> Result<()> {
    let parts: Vec<&str> = pattern.split('/').collect();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            return Err(Error::Rules(format!("empty segment in pattern '{pattern}'")));
        }
        if *part == "**" && i + 1 != parts.len() {
            return Err(Error::Rules(format!("'**' must be last in pattern '{pattern}'")));
        }
    }
    Ok(())
}

/// Match a pattern against request segments, returning `{name}` captures.
/// A capture bound to the list placeholder maps to `None`.
fn match_pattern<'a>(
    pattern: &'a str,
    segments: &[Segment<'a>],
) -> Option<HashMap<&'a str, Option<&'a str>>> {
    let mut captures = HashMap::new();
    let parts: Vec<&str> = pattern.split('/').collect();

    for (i, part) in parts.iter().enumerate() {
        if *part == "**" {
            return (segments.len() > i).then_some(captures);
        }
        let segment = segments.get(i)?;
        if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            let value = match segment {
                Segment::Literal(s) => Some(*s),
                Segment::AnyDoc => None,
            };
            captures.insert(name, value);
        } else if *segment != Segment::Literal(*part) {
            return None;
        }
    }
    (segments.len() == parts.len()).then_some(captures)
}

fn top_field<'a>(doc: Option<&'a Value>, field: &str) -> Option<&'a Value> {
    doc.and_then(|d| d.get(field))
}

fn condition_holds(
    condition: &Condition,
    request: &AccessRequest<'_>,
    captures: &HashMap<&str, Option<&str>>,
) -> bool {
    let principal = request.principal;
    match condition {
        Condition::Authenticated => matches!(principal, Principal::User { .. }),
        Condition::Unauthenticated => matches!(principal, Principal::Runtime),
        Condition::Owner => match (principal.uid(), captures.get("uid")) {
            (Some(uid), Some(Some(captured))) => uid == *captured,
            _ => false,
        },
        Condition::RoleAtLeast { role } => principal.role().is_some_and(|r| r >= *role),
        Condition::RoleBelow { role } => principal.role().is_none_or(|r| r < *role),
        Condition::FieldChanged { field } => {
            top_field(request.incoming, field) != top_field(request.existing, field)
        }
        Condition::ExistingFieldEquals { field, value } => {
            top_field(request.existing, field) == Some(value)
        }
        Condition::IncomingFieldEquals { field, value } => {
            top_field(request.incoming, field) == Some(value)
        }
        Condition::ForeignUidField { field } => {
            match (top_field(request.incoming, field), captures.get("uid")) {
                (Some(value), Some(Some(uid))) => value.as_str() != Some(*uid),
                _ => false,
            }
        }
    }
}

fn rule(
    id: &str,
    pattern: &str,
    operations: &[OperationSet],
    action: AccessAction,
    when: Vec<Condition>,
    priority: u32,
    description: &str,
) -> AccessRule {
    AccessRule {
        id: id.to_string(),
        pattern: pattern.to_string(),
        operations: operations.to_vec(),
        action,
        when,
        priority,
        description: Some(description.to_string()),
        source: RuleSource::Builtin,
    }
}

/// Subcollections the runtime may touch without a session, and how.
pub const RUNTIME_CRITICAL: [(Collection, &[OperationSet]); 8] = [
    (
        Collection::Schedules,
        &[OperationSet::Read, OperationSet::Create, OperationSet::Update],
    ),
    (Collection::FeedingLogs, &[OperationSet::Read, OperationSet::Create]),
    (Collection::SensorReadings, &[OperationSet::Read, OperationSet::Create]),
    (Collection::MortalityLogs, &[OperationSet::Read]),
    (
        Collection::HourlyRecords,
        &[OperationSet::Read, OperationSet::Create, OperationSet::Update],
    ),
    (
        Collection::DailyReports,
        &[OperationSet::Read, OperationSet::Create, OperationSet::Update],
    ),
    (
        Collection::WeeklyReports,
        &[OperationSet::Read, OperationSet::Create, OperationSet::Update],
    ),
    (
        Collection::MonthlyReports,
        &[OperationSet::Read, OperationSet::Create, OperationSet::Update],
    ),
];

/// Built-in access rules.
pub fn default_rules() -> Vec<AccessRule> {
    use AccessAction::{Allow, Deny};
    use OperationSet::{Create, Get, Read, Update, Write};

    let mut rules = vec![
        rule(
            "deny-schedule-regress",
            "users/{uid}/schedules/{id}",
            &[Update],
            Deny,
            vec![
                Condition::ExistingFieldEquals {
                    field: "status".to_string(),
                    value: Value::from("completed"),
                },
                Condition::FieldChanged {
                    field: "status".to_string(),
                },
            ],
            0,
            "Completed schedules keep their status",
        ),
        rule(
            "deny-completed-schedule-delete",
            "users/{uid}/schedules/{id}",
            &[OperationSet::Delete],
            Deny,
            vec![
                Condition::ExistingFieldEquals {
                    field: "status".to_string(),
                    value: Value::from("completed"),
                },
                Condition::RoleBelow {
                    role: Role::SuperAdmin,
                },
            ],
            0,
            "Completed schedules stay on record",
        ),
        rule(
            "deny-foreign-uid",
            "users/{uid}/{collection}/{id}",
            &[Create, Update],
            Deny,
            vec![Condition::ForeignUidField {
                field: "uid".to_string(),
            }],
            0,
            "Records name the owner they are filed under",
        ),
        rule(
            "deny-role-change",
            "users/{uid}",
            &[Update],
            Deny,
            vec![
                Condition::FieldChanged {
                    field: "role".to_string(),
                },
                Condition::RoleBelow {
                    role: Role::SuperAdmin,
                },
            ],
            0,
            "Only a super-admin changes roles",
        ),
        rule(
            "superadmin-all",
            "**",
            &[OperationSet::Any],
            Allow,
            vec![Condition::RoleAtLeast {
                role: Role::SuperAdmin,
            }],
            10,
            "Super-admins manage everything",
        ),
        rule(
            "admin-read-users",
            "users/{uid}",
            &[Read],
            Allow,
            vec![Condition::RoleAtLeast { role: Role::Admin }],
            20,
            "Admins see every profile",
        ),
        rule(
            "admin-read-user-data",
            "users/{uid}/**",
            &[Read],
            Allow,
            vec![Condition::RoleAtLeast { role: Role::Admin }],
            20,
            "Admins see every pond",
        ),
        rule(
            "admin-write-schedules",
            "users/{uid}/schedules/{id}",
            &[Write],
            Allow,
            vec![Condition::RoleAtLeast { role: Role::Admin }],
            20,
            "Admins manage feeding schedules",
        ),
        rule(
            "owner-read-profile",
            "users/{uid}",
            &[Get],
            Allow,
            vec![Condition::Owner],
            30,
            "Users read their own profile",
        ),
        rule(
            "owner-update-profile",
            "users/{uid}",
            &[Update],
            Allow,
            vec![Condition::Owner],
            30,
            "Users edit their own profile",
        ),
        rule(
            "owner-create-profile",
            "users/{uid}",
            &[Create],
            Allow,
            vec![
                Condition::Owner,
                Condition::IncomingFieldEquals {
                    field: "role".to_string(),
                    value: Value::from(Role::User.as_str()),
                },
            ],
            30,
            "Users register themselves with the user role",
        ),
        rule(
            "owner-read-data",
            "users/{uid}/**",
            &[Read],
            Allow,
            vec![Condition::Owner],
            30,
            "Users read their own pond",
        ),
        rule(
            "owner-write-schedules",
            "users/{uid}/schedules/{id}",
            &[Write],
            Allow,
            vec![Condition::Owner],
            30,
            "Users manage their own feeding schedules",
        ),
        rule(
            "owner-append-mortality",
            "users/{uid}/mortality_logs/{id}",
            &[Create],
            Allow,
            vec![Condition::Owner],
            30,
            "Users record mortality in their own pond",
        ),
        rule(
            "runtime-state",
            &format!("users/{{uid}}/{}/{{id}}", Collection::RuntimeState),
            &[Read, Create, Update],
            Allow,
            vec![Condition::Unauthenticated],
            40,
            "Runtime bookkeeping",
        ),
    ];

    for (collection, operations) in RUNTIME_CRITICAL {
        rules.push(rule(
            &format!("runtime-{}", collection.as_str().replace('_', "-")),
            &format!("users/{{uid}}/{collection}/{{id}}"),
            operations,
            Allow,
            vec![Condition::Unauthenticated],
            40,
            "Runtime-critical subcollection",
        ));
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(uid: &str) -> Principal {
        Principal::user(uid, Role::User)
    }

    fn check(principal: &Principal, operation: Operation, path: &str) -> bool {
        RuleEngine::new()
            .evaluate(&AccessRequest {
                principal,
                operation,
                path,
                existing: None,
                incoming: None,
            })
            .is_allowed()
    }

    #[test]
    fn owner_reads_own_subcollections() {
        let alice = user("alice");
        assert!(check(&alice, Operation::Get, "users/alice"));
        assert!(check(&alice, Operation::List, "users/alice/sensor_readings"));
        assert!(check(&alice, Operation::Get, "users/alice/daily_reports/2026-10-19"));
    }

    #[test]
    fn user_cannot_read_other_uid() {
        let alice = user("alice");
        assert!(!check(&alice, Operation::Get, "users/bob"));
        assert!(!check(&alice, Operation::List, "users/bob/sensor_readings"));
        assert!(!check(&alice, Operation::List, "users"));
    }

    #[test]
    fn owner_cannot_write_reports_or_readings() {
        let alice = user("alice");
        assert!(!check(&alice, Operation::Create, "users/alice/daily_reports/x"));
        assert!(!check(&alice, Operation::Create, "users/alice/sensor_readings/x"));
        assert!(check(&alice, Operation::Create, "users/alice/mortality_logs/x"));
        assert!(!check(&alice, Operation::Update, "users/alice/mortality_logs/x"));
    }

    #[test]
    fn admin_reads_everyone_but_cannot_write_reports() {
        let admin = Principal::user("root", Role::Admin);
        assert!(check(&admin, Operation::List, "users"));
        assert!(check(&admin, Operation::List, "users/bob/feeding_logs"));
        assert!(check(&admin, Operation::Create, "users/bob/schedules/s1"));
        assert!(!check(&admin, Operation::Update, "users/bob/daily_reports/x"));
        assert!(!check(&admin, Operation::Delete, "users/bob"));
    }

    #[test]
    fn runtime_cannot_touch_profiles_or_delete() {
        let runtime = Principal::Runtime;
        assert!(!check(&runtime, Operation::Get, "users/bob"));
        assert!(!check(&runtime, Operation::List, "users"));
        assert!(check(&runtime, Operation::Update, "users/bob/schedules/s1"));
        assert!(!check(&runtime, Operation::Delete, "users/bob/schedules/s1"));
        assert!(!check(&runtime, Operation::Create, "users/bob/mortality_logs/m1"));
    }

    #[test]
    fn completed_schedule_status_is_frozen() {
        let engine = RuleEngine::new();
        let existing = json!({"status": "completed", "notes": ""});
        let regress = json!({"status": "pending", "notes": ""});
        let note_only = json!({"status": "completed", "notes": "done"});

        for principal in [
            user("alice"),
            Principal::Runtime,
            Principal::user("root", Role::SuperAdmin),
        ] {
            let decision = engine.evaluate(&AccessRequest {
                principal: &principal,
                operation: Operation::Update,
                path: "users/alice/schedules/s1",
                existing: Some(&existing),
                incoming: Some(&regress),
            });
            assert!(!decision.is_allowed(), "{principal} regressed a schedule");
            assert_eq!(decision.rule_id.as_deref(), Some("deny-schedule-regress"));
        }

        let decision = engine.evaluate(&AccessRequest {
            principal: &user("alice"),
            operation: Operation::Update,
            path: "users/alice/schedules/s1",
            existing: Some(&existing),
            incoming: Some(&note_only),
        });
        assert!(decision.is_allowed());
    }

    #[test]
    fn dropping_status_counts_as_a_change() {
        let engine = RuleEngine::new();
        let existing = json!({"uid": "alice", "status": "completed"});
        let stripped = json!({"uid": "alice"});
        let decision = engine.evaluate(&AccessRequest {
            principal: &user("alice"),
            operation: Operation::Update,
            path: "users/alice/schedules/s1",
            existing: Some(&existing),
            incoming: Some(&stripped),
        });
        assert!(!decision.is_allowed());
        assert_eq!(decision.rule_id.as_deref(), Some("deny-schedule-regress"));
    }

    #[test]
    fn completed_schedule_delete_needs_superadmin() {
        let engine = RuleEngine::new();
        let completed = json!({"uid": "alice", "status": "completed"});
        let pending = json!({"uid": "alice", "status": "pending"});
        let delete = |principal: &Principal, existing: &Value| {
            engine
                .evaluate(&AccessRequest {
                    principal,
                    operation: Operation::Delete,
                    path: "users/alice/schedules/s1",
                    existing: Some(existing),
                    incoming: None,
                })
                .is_allowed()
        };
        assert!(!delete(&user("alice"), &completed));
        assert!(!delete(&Principal::user("root", Role::Admin), &completed));
        assert!(delete(&Principal::user("god", Role::SuperAdmin), &completed));
        assert!(delete(&user("alice"), &pending));
    }

    #[test]
    fn records_must_name_their_owner() {
        let engine = RuleEngine::new();
        let write = |principal: &Principal, path: &str, incoming: &Value| {
            engine.evaluate(&AccessRequest {
                principal,
                operation: Operation::Create,
                path,
                existing: None,
                incoming: Some(incoming),
            })
        };
        let alice = user("alice");
        let forged = json!({"uid": "bob", "status": "pending"});
        let decision = write(&alice, "users/alice/schedules/x", &forged);
        assert!(!decision.is_allowed());
        assert_eq!(decision.rule_id.as_deref(), Some("deny-foreign-uid"));
        assert!(!write(&Principal::Runtime, "users/alice/feeding_logs/x", &forged).is_allowed());
        assert!(
            !write(&Principal::user("root", Role::Admin), "users/alice/schedules/x", &forged)
                .is_allowed()
        );

        let own = json!({"uid": "alice", "status": "pending"});
        assert!(write(&alice, "users/alice/schedules/x", &own).is_allowed());
        let no_uid = json!({"readings_seq": 3});
        assert!(write(&Principal::Runtime, "users/alice/runtime_state/aggregation", &no_uid).is_allowed());
    }

    #[test]
    fn only_superadmin_changes_roles() {
        let engine = RuleEngine::new();
        let existing = json!({"uid": "alice", "role": "user"});
        let promoted = json!({"uid": "alice", "role": "admin"});
        let request = |principal: &Principal| {
            engine
                .evaluate(&AccessRequest {
                    principal,
                    operation: Operation::Update,
                    path: "users/alice",
                    existing: Some(&existing),
                    incoming: Some(&promoted),
                })
                .is_allowed()
        };
        assert!(!request(&user("alice")));
        assert!(!request(&Principal::user("root", Role::Admin)));
        assert!(request(&Principal::user("root", Role::SuperAdmin)));
    }

    #[test]
    fn self_registration_requires_user_role() {
        let engine = RuleEngine::new();
        let alice = user("alice");
        let as_user = json!({"uid": "alice", "role": "user"});
        let as_admin = json!({"uid": "alice", "role": "admin"});
        let create = |incoming: &Value| {
            engine
                .evaluate(&AccessRequest {
                    principal: &alice,
                    operation: Operation::Create,
                    path: "users/alice",
                    existing: None,
                    incoming: Some(incoming),
                })
                .is_allowed()
        };
        assert!(create(&as_user));
        assert!(!create(&as_admin));
    }

    #[test]
    fn pattern_matching() {
        let list = [Segment::Literal("users"), Segment::AnyDoc];
        let caps = match_pattern("users/{uid}", &list).unwrap();
        assert_eq!(caps.get("uid"), Some(&None));

        let doc = [
            Segment::Literal("users"),
            Segment::Literal("u1"),
            Segment::Literal("schedules"),
            Segment::Literal("s1"),
        ];
        assert!(match_pattern("users/{uid}/**", &doc).is_some());
        assert!(match_pattern("users/{uid}/**", &doc[..2]).is_none());
        assert!(match_pattern("users/{uid}/feeding_logs/{id}", &doc).is_none());
        assert!(match_pattern("**", &doc).is_some());
    }

    #[test]
    fn no_match_denies() {
        let engine = RuleEngine::with_rules(Vec::new());
        let decision = engine.evaluate(&AccessRequest {
            principal: &Principal::user("root", Role::SuperAdmin),
            operation: Operation::Get,
            path: "users/root",
            existing: None,
            incoming: None,
        });
        assert!(!decision.is_allowed());
        assert!(decision.rule_id.is_none());
    }

    #[test]
    fn rule_file_parses() {
        let engine = RuleEngine::from_toml_str(
            r#"
[[rule]]
id = "open-readings"
pattern = "users/{uid}/sensor_readings/{id}"
operations = ["read"]
action = "allow"
priority = 5
when = [{ kind = "authenticated" }]
"#,
        )
        .unwrap();
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.rules()[0].source, RuleSource::File);
        assert!(
            engine
                .evaluate(&AccessRequest {
                    principal: &user("alice"),
                    operation: Operation::List,
                    path: "users/bob/sensor_readings",
                    existing: None,
                    incoming: None,
                })
                .is_allowed()
        );
    }

    #[test]
    fn shipped_rule_file_mirrors_builtins() {
        let file = RuleEngine::from_toml_str(include_str!("../../../config/access_rules.toml"))
            .unwrap();
        let builtin = RuleEngine::new();
        assert_eq!(file.rules().len(), builtin.rules().len());
        for expected in builtin.rules() {
            let found = file
                .rules()
                .iter()
                .find(|r| r.id == expected.id)
                .unwrap_or_else(|| panic!("missing rule {}", expected.id));
            assert_eq!(found.pattern, expected.pattern, "{}", expected.id);
            assert_eq!(found.operations, expected.operations, "{}", expected.id);
            assert_eq!(found.action, expected.action, "{}", expected.id);
            assert_eq!(found.when, expected.when, "{}", expected.id);
            assert_eq!(found.priority, expected.priority, "{}", expected.id);
        }
    }

    #[test]
    fn rule_file_rejects_inner_double_star() {
        let result = RuleEngine::from_toml_str(
            r#"
[[rule]]
id = "bad"
pattern = "users/**/x"
operations = ["any"]
action = "allow"
"#,
        );
        assert!(result.is_err());
    }
}

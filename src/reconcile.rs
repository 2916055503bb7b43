//! Schema reconciliation between desired and existing remote columns.
//!
//! DDL is assembled with [`StatementBuilder`] into an [`AtomicBlock`], which
//! renders to an [`ExecutionPlan`]: a plain `BEGIN; ...; COMMIT;` block, or,
//! when the block is larger than the payload threshold, a temporary plpgsql
//! function that is created, invoked once and dropped.

use crate::error::{Error, Result};
use crate::schema::{ColumnInfo, create_table_statement, qualified_table, quote_ident};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Largest statement sent directly; bigger blocks go through a function.
pub const DEFAULT_PAYLOAD_THRESHOLD: usize = 12000;

/// What to do when the destination table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Raise [`Error::TableExists`]
    #[default]
    Fail,
    /// Truncate and, if needed, alter the table
    Replace,
    /// Insert into the table as it is
    Append,
}

impl IfExists {
    /// Lowercase option name.
    pub fn as_str(&self) -> &'static str {
        match self {
            IfExists::Fail => "fail",
            IfExists::Replace => "replace",
            IfExists::Append => "append",
        }
    }
}

impl fmt::Display for IfExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IfExists {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail" => Ok(IfExists::Fail),
            "replace" => Ok(IfExists::Replace),
            "append" => Ok(IfExists::Append),
            other => Err(Error::validation(format!(
                "Invalid value for if_exists: '{}'. Use one of: fail, replace, append",
                other
            ))),
        }
    }
}

/// Ordered list of SQL statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementBuilder {
    statements: Vec<String>,
}

impl StatementBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement; a trailing `;` is stripped.
    pub fn push(&mut self, statement: impl Into<String>) -> &mut Self {
        let statement = statement.into();
        let trimmed = statement.trim().trim_end_matches(';').trim_end();
        if !trimmed.is_empty() {
            self.statements.push(trimmed.to_string());
        }
        self
    }

    /// Statements so far.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Whether no statement was pushed.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Wrap the statements into one atomic block.
    pub fn atomic(self) -> AtomicBlock {
        AtomicBlock {
            statements: self.statements,
        }
    }
}

/// Statements that must apply all together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicBlock {
    statements: Vec<String>,
}

impl AtomicBlock {
    /// `BEGIN; s1; s2; COMMIT;`
    pub fn render(&self) -> String {
        let mut out = String::from("BEGIN; ");
        for statement in &self.statements {
            out.push_str(statement);
            out.push_str("; ");
        }
        out.push_str("COMMIT;");
        out
    }

    /// Choose how to execute this block under a payload ceiling.
    pub fn plan(&self, schema: &str, threshold: usize) -> ExecutionPlan {
        if self.statements.is_empty() {
            return ExecutionPlan::Nothing;
        }
        let direct = self.render();
        if direct.len() <= threshold {
            return ExecutionPlan::Direct(direct);
        }

        let body: String = self
            .statements
            .iter()
            .map(|s| format!("{}; ", s))
            .collect();
        let digest = Sha256::digest(body.as_bytes());
        let function = format!(
            "{}.{}",
            quote_ident(schema),
            quote_ident(&format!("_tmp_sync_{}", &hex::encode(digest)[..16]))
        );

        ExecutionPlan::ViaFunction {
            create: format!(
                "CREATE OR REPLACE FUNCTION {}() RETURNS void AS $sync_body$ BEGIN {}END; \
                 $sync_body$ LANGUAGE plpgsql",
                function, body
            ),
            invoke: format!("SELECT {}()", function),
            drop: format!("DROP FUNCTION IF EXISTS {}()", function),
        }
    }
}

/// How a DDL block is sent to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Nothing to execute
    Nothing,
    /// One transactional statement
    Direct(String),
    /// Temporary function holding the statements
    ViaFunction {
        /// Function definition
        create: String,
        /// Single invocation
        invoke: String,
        /// Cleanup
        drop: String,
    },
}

impl ExecutionPlan {
    /// Statements in execution order.
    pub fn statements(&self) -> Vec<&str> {
        match self {
            ExecutionPlan::Nothing => Vec::new(),
            ExecutionPlan::Direct(sql) => vec![sql.as_str()],
            ExecutionPlan::ViaFunction {
                create,
                invoke,
                drop,
            } => vec![create.as_str(), invoke.as_str(), drop.as_str()],
        }
    }
}

/// Reconciliation decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Table absent: create it
    Create,
    /// Same columns: only truncate
    Truncate,
    /// Truncate and alter the column set
    Alter {
        /// Remote columns dropped
        dropped: Vec<String>,
        /// Columns added
        added: Vec<ColumnInfo>,
    },
    /// Keep the table as it is
    Append,
}

impl ReconcileAction {
    /// Whether the table is (re)initialized, so registration applies.
    pub fn is_fresh(&self) -> bool {
        !matches!(self, ReconcileAction::Append)
    }
}

/// Action plus the DDL that implements it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Decision
    pub action: ReconcileAction,
    /// DDL to run before the copy
    pub plan: ExecutionPlan,
}

fn comparable(columns: &[ColumnInfo]) -> Vec<&ColumnInfo> {
    let mut out: Vec<&ColumnInfo> = columns.iter().filter(|c| !c.is_reserved()).collect();
    out.sort_by(|a, b| a.remote_name.cmp(&b.remote_name));
    out
}

/// Whether `desired` needs no structural change over `existing`: the
/// non-reserved columns match ignoring order, and every reserved desired
/// column already exists.
pub fn columns_equal(desired: &[ColumnInfo], existing: &[ColumnInfo]) -> bool {
    let existing_names: HashSet<&str> = existing.iter().map(|c| c.remote_name.as_str()).collect();
    comparable(desired) == comparable(existing)
        && desired
            .iter()
            .filter(|c| c.is_reserved())
            .all(|c| existing_names.contains(c.remote_name.as_str()))
}

/// Decides and renders the DDL for one upload.
#[derive(Debug, Clone)]
pub struct SchemaReconciler {
    payload_threshold: usize,
}

impl Default for SchemaReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_THRESHOLD)
    }
}

impl SchemaReconciler {
    /// Reconciler with the given payload ceiling in bytes.
    pub fn new(payload_threshold: usize) -> Self {
        Self { payload_threshold }
    }

    /// Reconcile `desired` against `existing` (`None` when the table is absent).
    pub fn reconcile(
        &self,
        schema: &str,
        table: &str,
        desired: &[ColumnInfo],
        existing: Option<&[ColumnInfo]>,
        if_exists: IfExists,
    ) -> Result<Reconciliation> {
        let target = qualified_table(schema, table);
        let mut builder = StatementBuilder::new();

        let action = match (existing, if_exists) {
            (None, _) => {
                builder.push(create_table_statement(&target, desired));
                ReconcileAction::Create
            }
            (Some(_), IfExists::Fail) => {
                return Err(Error::TableExists {
                    schema: schema.to_string(),
                    table: table.to_string(),
                });
            }
            (Some(_), IfExists::Append) => ReconcileAction::Append,
            (Some(existing), IfExists::Replace) => {
                builder.push(format!("TRUNCATE TABLE {}", target));
                if columns_equal(desired, existing) {
                    ReconcileAction::Truncate
                } else {
                    let (dropped, added) = diff(desired, existing);
                    builder.push(alter_statement(&target, &dropped, &added));
                    ReconcileAction::Alter { dropped, added }
                }
            }
        };

        Ok(Reconciliation {
            action,
            plan: builder.atomic().plan(schema, self.payload_threshold),
        })
    }
}

/// Columns to drop from and add to `existing` to reach `desired`.
fn diff(desired: &[ColumnInfo], existing: &[ColumnInfo]) -> (Vec<String>, Vec<ColumnInfo>) {
    let existing_names: HashSet<&str> = existing.iter().map(|c| c.remote_name.as_str()).collect();

    let dropped: Vec<String> = comparable(existing)
        .into_iter()
        .filter(|e| !desired.contains(e))
        .map(|e| e.remote_name.clone())
        .collect();

    let added: Vec<ColumnInfo> = desired
        .iter()
        .filter(|d| {
            if d.is_reserved() {
                !existing_names.contains(d.remote_name.as_str())
            } else {
                !existing.contains(d)
            }
        })
        .cloned()
        .collect();

    (dropped, added)
}

fn alter_statement(target: &str, dropped: &[String], added: &[ColumnInfo]) -> String {
    let clauses: Vec<String> = dropped
        .iter()
        .map(|name| format!("DROP COLUMN {}", quote_ident(name)))
        .chain(added.iter().map(|c| format!("ADD COLUMN {}", c.definition())))
        .collect();
    format!("ALTER TABLE {} {}", target, clauses.join(", "))
}

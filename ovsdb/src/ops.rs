// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Transaction operation descriptors and their results.

use serde::ser::SerializeTuple;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
use serde_json::Value;
use uuid::Uuid;

use crate::datum;
use crate::OvsdbError;
use crate::OvsdbResult;
use crate::Row;
use crate::UUID_COLUMN;

/// A comparison used in a `where` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Eq,
    Ne,
    Includes,
    Excludes,
}

impl Function {
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::Eq => "==",
            Function::Ne => "!=",
            Function::Includes => "includes",
            Function::Excludes => "excludes",
        }
    }
}

/// A single `[column, function, value]` clause.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub column: String,
    pub function: Function,
    pub value: Value,
}

impl Condition {
    pub fn new(
        column: impl Into<String>,
        function: Function,
        value: Value,
    ) -> Self {
        Self {
            column: column.into(),
            function,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::new(column, Function::Eq, value)
    }

    /// Match the row whose identity is `id`.
    pub fn uuid_is(id: &Uuid) -> Self {
        Self::eq(UUID_COLUMN, datum::uuid(id))
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut t = s.serialize_tuple(3)?;
        t.serialize_element(&self.column)?;
        t.serialize_element(self.function.as_str())?;
        t.serialize_element(&self.value)?;
        t.end()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutator {
    Insert,
    Delete,
}

impl Mutator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }
}

/// A single `[column, mutator, value]` mutation of a set column.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub column: String,
    pub mutator: Mutator,
    pub value: Value,
}

impl Mutation {
    pub fn new(column: impl Into<String>, mutator: Mutator, value: Value) -> Self {
        Self {
            column: column.into(),
            mutator,
            value,
        }
    }
}

impl Serialize for Mutation {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut t = s.serialize_tuple(3)?;
        t.serialize_element(&self.column)?;
        t.serialize_element(self.mutator.as_str())?;
        t.serialize_element(&self.value)?;
        t.end()
    }
}

/// How a `wait` compares the matching rows with the expected ones. Only
/// equality is built by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WaitUntil {
    #[serde(rename = "==")]
    Equal,
}

/// One step of a transaction.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Insert {
        table: String,
        row: Row,
        #[serde(rename = "uuid-name", skip_serializing_if = "Option::is_none")]
        uuid_name: Option<String>,
    },
    Select {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<String>>,
    },
    Update {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        row: Row,
    },
    Mutate {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Delete {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
    },
    /// Abort the transaction unless the rows matching `conditions`, projected
    /// onto `columns`, compare to `rows` as `until` says.
    Wait {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        columns: Vec<String>,
        until: WaitUntil,
        rows: Vec<Row>,
        timeout: u64,
    },
}

impl Operation {
    pub fn select(table: &str, conditions: Vec<Condition>) -> Self {
        Operation::Select {
            table: table.to_string(),
            conditions,
            columns: None,
        }
    }

    pub fn insert(table: &str, row: Row, uuid_name: Option<&str>) -> Self {
        Operation::Insert {
            table: table.to_string(),
            row,
            uuid_name: uuid_name.map(str::to_string),
        }
    }

    pub fn update(table: &str, conditions: Vec<Condition>, row: Row) -> Self {
        Operation::Update {
            table: table.to_string(),
            conditions,
            row,
        }
    }

    pub fn mutate(
        table: &str,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    ) -> Self {
        Operation::Mutate {
            table: table.to_string(),
            conditions,
            mutations,
        }
    }

    pub fn delete(table: &str, conditions: Vec<Condition>) -> Self {
        Operation::Delete {
            table: table.to_string(),
            conditions,
        }
    }

    /// Fail immediately unless exactly `rows` match `conditions`.
    pub fn wait_until_equal(
        table: &str,
        conditions: Vec<Condition>,
        columns: Vec<String>,
        rows: Vec<Row>,
    ) -> Self {
        Operation::Wait {
            table: table.to_string(),
            conditions,
            columns,
            until: WaitUntil::Equal,
            rows,
            timeout: 0,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Operation::Insert { table, .. }
            | Operation::Select { table, .. }
            | Operation::Update { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Wait { table, .. } => table,
        }
    }
}

/// The outcome of one operation in a transaction.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct OpResult {
    #[serde(default)]
    pub rows: Option<Vec<Row>>,
    #[serde(default)]
    pub uuid: Option<Value>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl OpResult {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows: Some(rows),
            ..Default::default()
        }
    }

    pub fn count(count: u64) -> Self {
        Self {
            count: Some(count),
            ..Default::default()
        }
    }

    pub fn failed(error: &str, details: impl Into<String>) -> Self {
        Self {
            error: Some(error.to_string()),
            details: Some(details.into()),
            ..Default::default()
        }
    }

    /// The rows returned by a `select`.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows.unwrap_or_default()
    }

    /// The identity of the row created by an `insert`.
    pub fn inserted_uuid(&self) -> Option<Uuid> {
        self.uuid.as_ref().and_then(datum::as_uuid)
    }
}

/// Turn the raw reply to a transaction of `n_ops` operations into one result
/// per operation, or the first error the server reported.
///
/// A failing operation carries an `error` member; the operations after it may
/// be `null`. An error in an element past the last operation means the
/// operations themselves succeeded but the commit did not.
pub fn check_results(
    n_ops: usize,
    results: Vec<Option<OpResult>>,
) -> OvsdbResult<Vec<OpResult>> {
    for (index, result) in results.iter().enumerate() {
        let Some(OpResult {
            error: Some(error),
            details,
            ..
        }) = result
        else {
            continue;
        };
        let details = details.clone().unwrap_or_default();
        if index < n_ops {
            return Err(OvsdbError::Operation {
                index,
                error: error.clone(),
                details,
            });
        }
        return Err(OvsdbError::Commit {
            error: error.clone(),
            details,
        });
    }

    if results.len() < n_ops {
        return Err(OvsdbError::Malformed(format!(
            "expected {n_ops} results, got {}",
            results.len()
        )));
    }

    results
        .into_iter()
        .take(n_ops)
        .enumerate()
        .map(|(index, r)| {
            r.ok_or_else(|| {
                OvsdbError::Malformed(format!("missing result {index}"))
            })
        })
        .collect()
}

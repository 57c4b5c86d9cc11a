// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! An in-process database with OVSDB transaction semantics.
//!
//! There is no schema: tables spring into existence on first insert, and a
//! column absent from a row reads as the empty set. Each transaction runs
//! against a private copy of the tables, which replaces the live copy only
//! when every operation succeeded.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;

use crate::check_results;
use crate::datum;
use crate::Condition;
use crate::Function;
use crate::Mutation;
use crate::Mutator;
use crate::OpResult;
use crate::Operation;
use crate::OvsdbError;
use crate::OvsdbResult;
use crate::Row;
use crate::Transact;
use crate::WaitUntil;
use crate::UUID_COLUMN;

type Table = BTreeMap<Uuid, Row>;
type Tables = BTreeMap<String, Table>;

pub struct MemoryDb {
    name: String,
    tables: Mutex<Tables>,
}

impl MemoryDb {
    /// Create an empty database called `name`.
    pub fn new(name: &str) -> Self {
        MemoryDb {
            name: name.to_string(),
            tables: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Transact for MemoryDb {
    fn transact(
        &self,
        db: &str,
        ops: &[Operation],
    ) -> OvsdbResult<Vec<OpResult>> {
        if db != self.name {
            return Err(OvsdbError::Rpc {
                error: "unknown database".to_string(),
                details: format!("database {db} is not served"),
            });
        }

        let mut live = self.tables.lock().unwrap();
        let mut txn = Txn {
            tables: live.clone(),
            named: HashMap::new(),
        };

        let mut results = Vec::with_capacity(ops.len());
        let mut failed = false;
        for op in ops {
            if failed {
                results.push(None);
                continue;
            }
            let result = txn.apply(op);
            failed = result.error.is_some();
            results.push(Some(result));
        }

        if !failed {
            *live = txn.tables;
        }
        check_results(ops.len(), results)
    }
}

struct Txn {
    tables: Tables,
    named: HashMap<String, Uuid>,
}

impl Txn {
    fn apply(&mut self, op: &Operation) -> OpResult {
        match op {
            Operation::Insert {
                table,
                row,
                uuid_name,
            } => {
                let id = Uuid::new_v4();
                if let Some(name) = uuid_name {
                    self.named.insert(name.clone(), id);
                }
                let mut row = match self.resolve_row(row) {
                    Ok(row) => row,
                    Err(e) => return e,
                };
                row.insert(UUID_COLUMN.to_string(), datum::uuid(&id));
                self.tables.entry(table.clone()).or_default().insert(id, row);
                OpResult {
                    uuid: Some(datum::uuid(&id)),
                    ..Default::default()
                }
            }
            Operation::Select {
                table,
                conditions,
                columns,
            } => match self.matching(table, conditions) {
                Ok(ids) => {
                    let rows = ids
                        .iter()
                        .map(|id| self.project(table, id, columns.as_deref()))
                        .collect();
                    OpResult::rows(rows)
                }
                Err(e) => e,
            },
            Operation::Update {
                table,
                conditions,
                row,
            } => {
                let update = match self.resolve_row(row) {
                    Ok(row) => row,
                    Err(e) => return e,
                };
                if update.contains_key(UUID_COLUMN) {
                    return OpResult::failed(
                        "constraint violation",
                        "_uuid is read-only",
                    );
                }
                let ids = match self.matching(table, conditions) {
                    Ok(ids) => ids,
                    Err(e) => return e,
                };
                let rows = self.tables.entry(table.clone()).or_default();
                for id in &ids {
                    if let Some(existing) = rows.get_mut(id) {
                        for (column, value) in &update {
                            existing.insert(column.clone(), value.clone());
                        }
                    }
                }
                OpResult::count(ids.len() as u64)
            }
            Operation::Mutate {
                table,
                conditions,
                mutations,
            } => {
                let ids = match self.matching(table, conditions) {
                    Ok(ids) => ids,
                    Err(e) => return e,
                };
                let mutations: Vec<Mutation> = match mutations
                    .iter()
                    .map(|m| {
                        self.resolve(&m.value).map(|value| Mutation {
                            value,
                            ..m.clone()
                        })
                    })
                    .collect()
                {
                    Ok(m) => m,
                    Err(e) => return e,
                };
                let rows = self.tables.entry(table.clone()).or_default();
                for id in &ids {
                    if let Some(existing) = rows.get_mut(id) {
                        for m in &mutations {
                            mutate(existing, m);
                        }
                    }
                }
                OpResult::count(ids.len() as u64)
            }
            Operation::Delete { table, conditions } => {
                let ids = match self.matching(table, conditions) {
                    Ok(ids) => ids,
                    Err(e) => return e,
                };
                if let Some(rows) = self.tables.get_mut(table) {
                    for id in &ids {
                        rows.remove(id);
                    }
                }
                OpResult::count(ids.len() as u64)
            }
            Operation::Wait {
                table,
                conditions,
                columns,
                until,
                rows,
                ..
            } => {
                let ids = match self.matching(table, conditions) {
                    Ok(ids) => ids,
                    Err(e) => return e,
                };
                let found: Vec<Row> = ids
                    .iter()
                    .map(|id| self.project(table, id, Some(columns.as_slice())))
                    .collect();
                let expected: Vec<Row> = rows
                    .iter()
                    .map(|row| project_row(row, columns))
                    .collect();
                let satisfied = match until {
                    WaitUntil::Equal => rows_eq(&found, &expected),
                };
                if satisfied {
                    OpResult::default()
                } else {
                    OpResult::failed(
                        OvsdbError::WAIT_TIMED_OUT,
                        "\"wait\" timed out",
                    )
                }
            }
        }
    }

    // Replace `["named-uuid", ..]` references with the rows they name.
    fn resolve(&self, v: &Value) -> Result<Value, OpResult> {
        if let Some(name) = datum::as_named_uuid(v) {
            return match self.named.get(name) {
                Some(id) => Ok(datum::uuid(id)),
                None => Err(OpResult::failed(
                    "syntax error",
                    format!("unknown named-uuid {name}"),
                )),
            };
        }
        match v {
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn resolve_row(&self, row: &Row) -> Result<Row, OpResult> {
        row.iter()
            .map(|(column, value)| {
                self.resolve(value).map(|v| (column.clone(), v))
            })
            .collect()
    }

    fn matching(
        &self,
        table: &str,
        conditions: &[Condition],
    ) -> Result<Vec<Uuid>, OpResult> {
        let conditions = conditions
            .iter()
            .map(|c| {
                self.resolve(&c.value).map(|value| Condition {
                    value,
                    ..c.clone()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Some(rows) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(_, row)| conditions.iter().all(|c| holds(row, c)))
            .map(|(id, _)| *id)
            .collect())
    }

    fn project(&self, table: &str, id: &Uuid, columns: Option<&[String]>) -> Row {
        let row = &self.tables[table][id];
        match columns {
            Some(columns) => project_row(row, columns),
            None => row.clone(),
        }
    }
}

fn column<'a>(row: &'a Row, name: &str) -> std::borrow::Cow<'a, Value> {
    match row.get(name) {
        Some(v) => std::borrow::Cow::Borrowed(v),
        None => std::borrow::Cow::Owned(datum::empty_set()),
    }
}

fn project_row(row: &Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), column(row, c).into_owned()))
        .collect()
}

fn holds(row: &Row, c: &Condition) -> bool {
    let value = column(row, &c.column);
    match c.function {
        Function::Eq => datum::datum_eq(&value, &c.value),
        Function::Ne => !datum::datum_eq(&value, &c.value),
        Function::Includes => {
            let have = datum::atoms(&value);
            datum::atoms(&c.value).iter().all(|a| have.contains(a))
        }
        Function::Excludes => {
            let have = datum::atoms(&value);
            !datum::atoms(&c.value).iter().any(|a| have.contains(a))
        }
    }
}

fn mutate(row: &mut Row, m: &Mutation) {
    let mut atoms = datum::atoms(&column(row, &m.column));
    let change = datum::atoms(&m.value);
    match m.mutator {
        Mutator::Insert => {
            for a in change {
                if !atoms.contains(&a) {
                    atoms.push(a);
                }
            }
        }
        Mutator::Delete => atoms.retain(|a| !change.contains(a)),
    }
    row.insert(m.column.clone(), datum::set(atoms));
}

// Rows compare as an unordered collection of rows, each compared column by
// column with datum equality.
fn rows_eq(a: &[Row], b: &[Row]) -> bool {
    let row_eq = |x: &Row, y: &Row| {
        x.len() == y.len()
            && x.iter().all(|(k, v)| {
                y.get(k).map(|w| datum::datum_eq(v, w)).unwrap_or(false)
            })
    };
    a.len() == b.len()
        && a.iter().all(|x| b.iter().any(|y| row_eq(x, y)))
        && b.iter().all(|y| a.iter().any(|x| row_eq(x, y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DB: &str = "OVN_Northbound";

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    fn names(db: &MemoryDb) -> Vec<String> {
        let r = db
            .transact(DB, &[Operation::select("Logical_Switch", vec![])])
            .unwrap();
        r[0].clone()
            .into_rows()
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_insert_select() {
        let db = MemoryDb::new(DB);
        let r = db
            .transact(
                DB,
                &[Operation::insert(
                    "Logical_Switch",
                    row(json!({"name": "net1"})),
                    None,
                )],
            )
            .unwrap();
        let id = r[0].inserted_uuid().unwrap();

        let r = db
            .transact(
                DB,
                &[Operation::select(
                    "Logical_Switch",
                    vec![Condition::uuid_is(&id)],
                )],
            )
            .unwrap();
        let rows = r[0].clone().into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("net1"));
        assert_eq!(datum::as_uuid(&rows[0][UUID_COLUMN]), Some(id));
    }

    #[test]
    fn test_failed_wait_discards_transaction() {
        let db = MemoryDb::new(DB);
        let insert = Operation::insert(
            "Logical_Switch",
            row(json!({"name": "net1"})),
            None,
        );
        db.transact(DB, &[insert.clone()]).unwrap();

        // The insert precedes the wait here, so it has already been applied
        // to the transaction's copy when the wait fails.
        let wait = Operation::wait_until_equal(
            "Logical_Switch",
            vec![Condition::eq("name", json!("net1"))],
            vec!["name".to_string()],
            vec![],
        );
        let err = db.transact(DB, &[insert, wait]).unwrap_err();
        assert!(err.is_failed_wait(1));
        assert_eq!(names(&db), vec!["net1".to_string()]);
    }

    #[test]
    fn test_named_uuid_mutate() {
        let db = MemoryDb::new(DB);
        let r = db
            .transact(
                DB,
                &[Operation::insert(
                    "Logical_Switch",
                    row(json!({"name": "net1"})),
                    None,
                )],
            )
            .unwrap();
        let ls = r[0].inserted_uuid().unwrap();

        let r = db
            .transact(
                DB,
                &[
                    Operation::insert(
                        "Logical_Switch_Port",
                        row(json!({"name": "port1"})),
                        Some("lsp"),
                    ),
                    Operation::mutate(
                        "Logical_Switch",
                        vec![Condition::uuid_is(&ls)],
                        vec![Mutation::new(
                            "ports",
                            Mutator::Insert,
                            datum::set([datum::named_uuid("lsp")]),
                        )],
                    ),
                ],
            )
            .unwrap();
        let lsp = r[0].inserted_uuid().unwrap();
        assert_eq!(r[1].count, Some(1));

        let ports = Condition::new(
            "ports",
            Function::Includes,
            datum::uuid(&lsp),
        );
        let r = db
            .transact(DB, &[Operation::select("Logical_Switch", vec![ports])])
            .unwrap();
        let rows = r[0].clone().into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(datum::as_uuid_set(&rows[0]["ports"]), Some(vec![lsp]));

        // Removing the port leaves the empty set behind.
        db.transact(
            DB,
            &[Operation::mutate(
                "Logical_Switch",
                vec![Condition::uuid_is(&ls)],
                vec![Mutation::new(
                    "ports",
                    Mutator::Delete,
                    datum::set([datum::uuid(&lsp)]),
                )],
            )],
        )
        .unwrap();
        let wait = Operation::wait_until_equal(
            "Logical_Switch",
            vec![Condition::uuid_is(&ls)],
            vec!["ports".to_string()],
            vec![row(json!({"ports": ["set", []]}))],
        );
        db.transact(DB, &[wait]).unwrap();
    }

    #[test]
    fn test_unknown_named_uuid() {
        let db = MemoryDb::new(DB);
        let err = db
            .transact(
                DB,
                &[Operation::insert(
                    "Logical_Switch",
                    row(json!({"ports": ["named-uuid", "nope"]})),
                    None,
                )],
            )
            .unwrap_err();
        assert!(matches!(err, OvsdbError::Operation { index: 0, .. }));
        assert!(names(&db).is_empty());
    }

    #[test]
    fn test_update_delete() {
        let db = MemoryDb::new(DB);
        let r = db
            .transact(
                DB,
                &[Operation::insert(
                    "Logical_Switch",
                    row(json!({"name": "net1"})),
                    None,
                )],
            )
            .unwrap();
        let id = r[0].inserted_uuid().unwrap();

        let r = db
            .transact(
                DB,
                &[Operation::update(
                    "Logical_Switch",
                    vec![Condition::uuid_is(&id)],
                    row(json!({"name": "net2"})),
                )],
            )
            .unwrap();
        assert_eq!(r[0].count, Some(1));
        assert_eq!(names(&db), vec!["net2".to_string()]);

        let r = db
            .transact(
                DB,
                &[Operation::delete(
                    "Logical_Switch",
                    vec![Condition::uuid_is(&id)],
                )],
            )
            .unwrap();
        assert_eq!(r[0].count, Some(1));
        assert!(names(&db).is_empty());

        assert!(db.transact("Open_vSwitch", &[]).is_err());
    }
}

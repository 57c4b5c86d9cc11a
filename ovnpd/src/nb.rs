// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Access to the OVN northbound database.
//!
//! Each public method issues exactly one transaction. Errors from the
//! connection or the database are returned unchanged as
//! [`ProviderError::Database`]; the only domain errors raised here are those
//! decided inside a transaction (a duplicate name, a delete blocked by ports).

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use common::network::MacAddr;
use ovsdb::datum;
use ovsdb::Condition;
use ovsdb::MemoryDb;
use ovsdb::OpResult;
use ovsdb::Operation;
use ovsdb::OvsdbError;
use ovsdb::Remote;
use ovsdb::Row;
use ovsdb::Transact;
use oxnet::IpNet;
use serde_json::json;
use serde_json::Value;
use slog::debug;
use slog::info;
use slog::o;
use uuid::Uuid;

use crate::types::ProviderError;
use crate::types::ProviderResult;

pub const LOGICAL_SWITCH: &str = "Logical_Switch";
pub const LOGICAL_SWITCH_PORT: &str = "Logical_Switch_Port";
pub const DHCP_OPTIONS: &str = "DHCP_Options";

pub const EXTERNAL_ID_DEVICE_ID: &str = "ovirt_device_id";
pub const EXTERNAL_ID_DEVICE_OWNER: &str = "ovirt_device_owner";
pub const EXTERNAL_ID_NETWORK_ID: &str = "ovirt_network_id";
pub const EXTERNAL_ID_NAME: &str = "ovirt_name";

const NEW_ROW: &str = "new_row";

fn malformed(table: &str, column: &str) -> ProviderError {
    ProviderError::Database(OvsdbError::Malformed(format!(
        "{table} row has an invalid {column} column"
    )))
}

fn string_column(row: &Row, table: &str, column: &str) -> ProviderResult<String> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        None => Ok(String::new()),
        Some(_) => Err(malformed(table, column)),
    }
}

fn map_column(
    row: &Row,
    table: &str,
    column: &str,
) -> ProviderResult<BTreeMap<String, String>> {
    match row.get(column) {
        None => Ok(BTreeMap::new()),
        // An empty map may arrive as an empty set.
        Some(v) => datum::as_string_map(v)
            .or_else(|| {
                datum::as_string_set(v)
                    .filter(Vec::is_empty)
                    .map(|_| BTreeMap::new())
            })
            .ok_or_else(|| malformed(table, column)),
    }
}

fn row_id(row: &Row, table: &str) -> ProviderResult<Uuid> {
    row.get(ovsdb::UUID_COLUMN)
        .and_then(datum::as_uuid)
        .ok_or_else(|| malformed(table, ovsdb::UUID_COLUMN))
}

/// A row of `Logical_Switch`, the database side of a network.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalSwitch {
    pub id: Uuid,
    pub name: String,
    pub ports: Vec<Uuid>,
    pub external_ids: BTreeMap<String, String>,
}

impl LogicalSwitch {
    pub fn from_row(row: &Row) -> ProviderResult<Self> {
        let t = LOGICAL_SWITCH;
        Ok(LogicalSwitch {
            id: row_id(row, t)?,
            name: string_column(row, t, "name")?,
            ports: match row.get("ports") {
                None => Vec::new(),
                Some(v) => {
                    datum::as_uuid_set(v).ok_or_else(|| malformed(t, "ports"))?
                }
            },
            external_ids: map_column(row, t, "external_ids")?,
        })
    }
}

/// A row of `Logical_Switch_Port`, the database side of a port.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalSwitchPort {
    pub id: Uuid,
    pub name: String,
    pub addresses: Vec<String>,
    pub enabled: Option<bool>,
    pub up: Option<bool>,
    pub external_ids: BTreeMap<String, String>,
}

// Port and subnet rows are only decoded once their operations below are
// backed by the database.
#[allow(dead_code)]
impl LogicalSwitchPort {
    pub fn from_row(row: &Row) -> ProviderResult<Self> {
        let t = LOGICAL_SWITCH_PORT;
        let bool_column = |column: &str| match row.get(column) {
            None => Ok(None),
            Some(v) => {
                datum::as_optional_bool(v).ok_or_else(|| malformed(t, column))
            }
        };
        Ok(LogicalSwitchPort {
            id: row_id(row, t)?,
            name: string_column(row, t, "name")?,
            addresses: match row.get("addresses") {
                None => Vec::new(),
                Some(v) => datum::as_string_set(v)
                    .ok_or_else(|| malformed(t, "addresses"))?,
            },
            enabled: bool_column("enabled")?,
            up: bool_column("up")?,
            external_ids: map_column(row, t, "external_ids")?,
        })
    }
}

impl LogicalSwitchPort {
    /// The MAC address carried first in `addresses`. Each entry is the MAC
    /// followed by any IP addresses, or a keyword such as `dynamic`.
    pub fn mac(&self) -> Option<MacAddr> {
        self.addresses
            .iter()
            .filter_map(|a| a.split_whitespace().next())
            .find_map(|word| word.parse().ok())
    }
}

/// A row of `DHCP_Options`, the database side of a subnet.
#[derive(Clone, Debug, PartialEq)]
pub struct DhcpOptions {
    pub id: Uuid,
    pub cidr: String,
    pub options: BTreeMap<String, String>,
    pub external_ids: BTreeMap<String, String>,
}

#[allow(dead_code)]
impl DhcpOptions {
    pub fn from_row(row: &Row) -> ProviderResult<Self> {
        let t = DHCP_OPTIONS;
        Ok(DhcpOptions {
            id: row_id(row, t)?,
            cidr: string_column(row, t, "cidr")?,
            options: map_column(row, t, "options")?,
            external_ids: map_column(row, t, "external_ids")?,
        })
    }
}

impl DhcpOptions {
    /// Name of the `options` key holding the default gateway.
    pub const ROUTER: &'static str = "router";
    /// Name of the `options` key holding the DNS servers.
    pub const DNS_SERVER: &'static str = "dns_server";

    /// The DNS servers, which OVN writes either bare or as `{a, b}`.
    pub fn dns_servers(&self) -> Vec<String> {
        self.options
            .get(Self::DNS_SERVER)
            .map(|s| {
                s.trim_start_matches('{')
                    .trim_end_matches('}')
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq)]
pub struct PortArgs {
    pub network_id: String,
    pub name: String,
    pub mac: Option<MacAddr>,
    pub is_enabled: Option<bool>,
    pub is_up: Option<bool>,
    pub external_device_id: Option<String>,
    pub external_owner: Option<String>,
}

#[allow(dead_code)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortUpdateArgs {
    pub network_id: Option<String>,
    pub name: Option<String>,
    pub mac: Option<MacAddr>,
    pub is_enabled: Option<bool>,
    pub is_up: Option<bool>,
    pub external_device_id: Option<String>,
    pub external_owner: Option<String>,
}

#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq)]
pub struct SubnetArgs {
    pub name: String,
    pub cidr: IpNet,
    pub network_id: String,
    pub dns: Vec<IpAddr>,
    pub gateway: Option<IpAddr>,
}

#[allow(dead_code)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubnetUpdateArgs {
    pub name: Option<String>,
    pub cidr: Option<IpNet>,
    pub dns: Option<Vec<IpAddr>>,
    pub gateway: Option<IpAddr>,
}

/// The long-lived handle on the northbound database, shared by all requests.
pub struct NbClient {
    db: Arc<dyn Transact>,
    log: slog::Logger,
}

impl NbClient {
    pub fn new(db: Arc<dyn Transact>, log: &slog::Logger) -> Self {
        NbClient {
            db,
            log: log.new(o!("unit" => "nb")),
        }
    }

    /// Open the database named by `remote`. `memory:` yields a fresh, empty
    /// in-process database.
    pub fn connect(
        remote: &Remote,
        timeout: Duration,
        log: &slog::Logger,
    ) -> ProviderResult<Self> {
        let db: Arc<dyn Transact> = match remote {
            Remote::Memory => {
                info!(log, "using an in-memory northbound database");
                Arc::new(MemoryDb::new(common::OVN_NORTHBOUND))
            }
            _ => {
                let client = ovsdb::Client::connect(remote, timeout, log)?;
                // Fail at startup if the far end does not speak OVSDB.
                client.echo()?;
                Arc::new(client)
            }
        };
        Ok(NbClient::new(db, log))
    }

    fn transact(&self, ops: &[Operation]) -> ProviderResult<Vec<OpResult>> {
        debug!(self.log, "transact"; "ops" => ops.len(),
            "table" => ops.first().map(Operation::table).unwrap_or_default());
        Ok(self.db.transact(common::OVN_NORTHBOUND, ops)?)
    }

    fn select_switches(
        &self,
        conditions: Vec<Condition>,
    ) -> ProviderResult<Vec<LogicalSwitch>> {
        let mut results =
            self.transact(&[Operation::select(LOGICAL_SWITCH, conditions)])?;
        rows_to_switches(results.remove(0))
    }

    pub fn list_networks(&self) -> ProviderResult<Vec<LogicalSwitch>> {
        self.select_switches(vec![])
    }

    /// Fetch a network by id. An id that is not a UUID names no network.
    pub fn get_network(
        &self,
        network_id: &str,
    ) -> ProviderResult<Option<LogicalSwitch>> {
        let Ok(id) = network_id.parse::<Uuid>() else {
            return Ok(None);
        };
        Ok(self
            .select_switches(vec![Condition::uuid_is(&id)])?
            .into_iter()
            .next())
    }

    /// Create a network. The name must not already be in use.
    pub fn add_network(&self, name: &str) -> ProviderResult<LogicalSwitch> {
        let mut row = Row::new();
        row.insert("name".to_string(), json!(name));
        let ops = [
            Operation::wait_until_equal(
                LOGICAL_SWITCH,
                vec![Condition::eq("name", json!(name))],
                vec!["name".to_string()],
                vec![],
            ),
            Operation::insert(LOGICAL_SWITCH, row, Some(NEW_ROW)),
            Operation::select(
                LOGICAL_SWITCH,
                vec![Condition::eq(
                    ovsdb::UUID_COLUMN,
                    datum::named_uuid(NEW_ROW),
                )],
            ),
        ];
        let mut results = match self.db.transact(common::OVN_NORTHBOUND, &ops) {
            Err(e) if e.is_failed_wait(0) => {
                return Err(ProviderError::Exists(format!(
                    "Logical switch {name} already exists"
                )))
            }
            other => other?,
        };
        rows_to_switches(results.remove(2))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::Database(OvsdbError::Malformed(
                    "inserted logical switch not returned".to_string(),
                ))
            })
    }

    /// Rename a network, returning it as stored afterwards.
    pub fn update_network(
        &self,
        network_id: &str,
        name: &str,
    ) -> ProviderResult<Option<LogicalSwitch>> {
        let Ok(id) = network_id.parse::<Uuid>() else {
            return Ok(None);
        };
        let mut row = Row::new();
        row.insert("name".to_string(), json!(name));
        let mut results = self.transact(&[
            Operation::update(LOGICAL_SWITCH, vec![Condition::uuid_is(&id)], row),
            Operation::select(LOGICAL_SWITCH, vec![Condition::uuid_is(&id)]),
        ])?;
        Ok(rows_to_switches(results.remove(1))?.into_iter().next())
    }

    /// Delete a network, provided it still exists and has no ports when the
    /// transaction is applied.
    pub fn delete_network(&self, network_id: &str) -> ProviderResult<()> {
        let not_found = || {
            ProviderError::NotFound(format!(
                "Network {network_id} does not exist"
            ))
        };
        let id: Uuid = network_id.parse().map_err(|_| not_found())?;

        let mut unused = Row::new();
        unused.insert("ports".to_string(), datum::empty_set());
        let ops = [
            Operation::wait_until_equal(
                LOGICAL_SWITCH,
                vec![Condition::uuid_is(&id)],
                vec!["ports".to_string()],
                vec![unused],
            ),
            Operation::delete(LOGICAL_SWITCH, vec![Condition::uuid_is(&id)]),
        ];
        match self.db.transact(common::OVN_NORTHBOUND, &ops) {
            Ok(_) => {
                debug!(self.log, "deleted logical switch"; "id" => %id);
                Ok(())
            }
            Err(e) if e.is_failed_wait(0) => {
                // Find out which half of the guard failed.
                match self.get_network(network_id)? {
                    None => Err(not_found()),
                    Some(_) => Err(ports_exist(network_id)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_ports(&self) -> ProviderResult<Vec<LogicalSwitchPort>> {
        Ok(Vec::new())
    }

    pub fn get_port(
        &self,
        _port_id: &str,
    ) -> ProviderResult<Option<LogicalSwitchPort>> {
        Ok(None)
    }

    pub fn add_port(
        &self,
        _args: PortArgs,
    ) -> ProviderResult<Option<LogicalSwitchPort>> {
        Ok(None)
    }

    pub fn update_port(
        &self,
        _port_id: &str,
        _args: PortUpdateArgs,
    ) -> ProviderResult<Option<LogicalSwitchPort>> {
        Ok(None)
    }

    pub fn update_port_mac(
        &self,
        _port_id: &str,
        _mac: MacAddr,
    ) -> ProviderResult<()> {
        Ok(())
    }

    pub fn delete_port(&self, _port_id: &str) -> ProviderResult<()> {
        Ok(())
    }

    pub fn list_subnets(&self) -> ProviderResult<Vec<DhcpOptions>> {
        Ok(Vec::new())
    }

    pub fn get_subnet(
        &self,
        _subnet_id: &str,
    ) -> ProviderResult<Option<DhcpOptions>> {
        Ok(None)
    }

    pub fn add_subnet(
        &self,
        _args: SubnetArgs,
    ) -> ProviderResult<Option<DhcpOptions>> {
        Ok(None)
    }

    pub fn update_subnet(
        &self,
        _subnet_id: &str,
        _args: SubnetUpdateArgs,
    ) -> ProviderResult<Option<DhcpOptions>> {
        Ok(None)
    }

    pub fn delete_subnet(&self, _subnet_id: &str) -> ProviderResult<()> {
        Ok(())
    }
}

pub fn ports_exist(network_id: &str) -> ProviderError {
    ProviderError::RestData(format!(
        "Unable to delete network {network_id}. Ports exist for the network"
    ))
}

fn rows_to_switches(result: OpResult) -> ProviderResult<Vec<LogicalSwitch>> {
    result.into_rows().iter().map(LogicalSwitch::from_row).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn test_log() -> slog::Logger {
        common::logging::init("test", &None, common::logging::LogFormat::Human)
            .unwrap()
    }

    /// A client over an empty in-memory database, and that database.
    pub(crate) fn memory_nb() -> (NbClient, Arc<MemoryDb>) {
        let db = Arc::new(MemoryDb::new(common::OVN_NORTHBOUND));
        (NbClient::new(db.clone(), &test_log()), db)
    }

    /// Attach a new, empty port to network `id` directly in the database.
    pub(crate) fn attach_port(db: &MemoryDb, id: &Uuid) {
        let mut row = Row::new();
        row.insert("name".to_string(), json!("lsp0"));
        db.transact(
            common::OVN_NORTHBOUND,
            &[
                Operation::insert(LOGICAL_SWITCH_PORT, row, Some("lsp")),
                Operation::mutate(
                    LOGICAL_SWITCH,
                    vec![Condition::uuid_is(id)],
                    vec![ovsdb::Mutation::new(
                        "ports",
                        ovsdb::Mutator::Insert,
                        datum::set([datum::named_uuid("lsp")]),
                    )],
                ),
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_network_lifecycle() {
        let (nb, _db) = memory_nb();
        assert!(nb.list_networks().unwrap().is_empty());

        let net = nb.add_network("net1").unwrap();
        assert_eq!(net.name, "net1");
        assert!(net.ports.is_empty());

        let id = net.id.to_string();
        assert_eq!(nb.get_network(&id).unwrap(), Some(net.clone()));
        assert_eq!(nb.list_networks().unwrap(), vec![net]);

        let renamed = nb.update_network(&id, "net2").unwrap().unwrap();
        assert_eq!(renamed.name, "net2");

        nb.delete_network(&id).unwrap();
        assert_eq!(nb.get_network(&id).unwrap(), None);
        assert!(matches!(
            nb.delete_network(&id),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_name() {
        let (nb, _db) = memory_nb();
        nb.add_network("net1").unwrap();
        assert!(matches!(
            nb.add_network("net1"),
            Err(ProviderError::Exists(_))
        ));
        assert_eq!(nb.list_networks().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_guard() {
        let (nb, db) = memory_nb();
        let net = nb.add_network("net1").unwrap();
        attach_port(&db, &net.id);

        let id = net.id.to_string();
        match nb.delete_network(&id) {
            Err(ProviderError::RestData(msg)) => {
                assert!(msg.contains("Ports exist for the network"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(nb.get_network(&id).unwrap().unwrap().ports.len(), 1);
    }

    #[test]
    fn test_not_a_uuid() {
        let (nb, _db) = memory_nb();
        assert_eq!(nb.get_network("not-a-uuid").unwrap(), None);
        assert_eq!(nb.update_network("not-a-uuid", "x").unwrap(), None);
        assert!(matches!(
            nb.delete_network("not-a-uuid"),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_database_errors_propagate() {
        let db = Arc::new(MemoryDb::new("Other"));
        let nb = NbClient::new(db, &test_log());
        assert!(matches!(
            nb.list_networks(),
            Err(ProviderError::Database(OvsdbError::Rpc { .. }))
        ));
    }

    #[test]
    fn test_port_row() {
        let id = Uuid::new_v4();
        let row: Row = serde_json::from_value(json!({
            "_uuid": ["uuid", id.to_string()],
            "name": "port1",
            "addresses": "00:1a:4a:16:01:51 10.0.0.5",
            "enabled": ["set", []],
            "up": true,
            "external_ids": ["map", [
                ["ovirt_device_id", "vm1"],
                ["ovirt_network_id", "net"],
            ]],
        }))
        .unwrap();
        let port = LogicalSwitchPort::from_row(&row).unwrap();
        assert_eq!(port.id, id);
        assert_eq!(port.enabled, None);
        assert_eq!(port.up, Some(true));
        assert_eq!(port.external_ids[EXTERNAL_ID_DEVICE_ID], "vm1");
        assert_eq!(
            port.mac(),
            Some(MacAddr::new(0x00, 0x1a, 0x4a, 0x16, 0x01, 0x51))
        );

        let mut bad = row.clone();
        bad.insert("up".to_string(), json!("yes"));
        assert!(LogicalSwitchPort::from_row(&bad).is_err());
    }

    #[test]
    fn test_dhcp_options_row() {
        let row: Row = serde_json::from_value(json!({
            "_uuid": ["uuid", Uuid::new_v4().to_string()],
            "cidr": "10.0.0.0/24",
            "options": ["map", [
                ["router", "10.0.0.1"],
                ["dns_server", "{8.8.8.8, 1.1.1.1}"],
            ]],
            "external_ids": ["set", []],
        }))
        .unwrap();
        let opts = DhcpOptions::from_row(&row).unwrap();
        assert_eq!(opts.cidr, "10.0.0.0/24");
        assert_eq!(opts.options[DhcpOptions::ROUTER], "10.0.0.1");
        assert_eq!(opts.dns_servers(), vec!["8.8.8.8", "1.1.1.1"]);
        assert!(opts.external_ids.is_empty());
    }

    #[test]
    fn test_switch_row_missing_uuid() {
        let row: Row = serde_json::from_value(json!({"name": "net1"})).unwrap();
        assert!(matches!(
            LogicalSwitch::from_row(&row),
            Err(ProviderError::Database(OvsdbError::Malformed(_)))
        ));
    }
}

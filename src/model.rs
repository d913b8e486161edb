//! Wire and domain data model for routes, TCP route mappings, and router groups.

use serde::{Deserialize, Serialize};

/// Version-stamps every write of an identity key.
///
/// Two updates of the same identity are ordered by comparing `(guid, index)`:
/// if `guid` matches, the higher `index` wins; if `guid` differs, the later
/// delivery wins (the store is the oracle of causality, not the tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationTag {
    pub guid: String,
    pub index: u64,
}

impl Default for ModificationTag {
    /// Equivalent to [`ModificationTag::fresh`]; exists so `Route`/
    /// `TcpRouteMapping` can derive a wire deserialization that tolerates a
    /// missing `modification_tag` field — every write path reassigns it with
    /// `fresh()` regardless of what (if anything) the client sent.
    fn default() -> Self {
        Self::fresh()
    }
}

impl ModificationTag {
    /// Tag for a brand-new identity key.
    pub fn fresh() -> Self {
        Self {
            guid: uuid::Uuid::new_v4().to_string(),
            index: 0,
        }
    }

    /// Tag for the next successful write of an already-tagged identity key.
    pub fn bump(&self) -> Self {
        Self {
            guid: self.guid.clone(),
            index: self.index + 1,
        }
    }
}

/// An HTTP (layer-7) route advertisement.
///
/// Identity is `(route, ip, port)`. `route` may carry a host plus an
/// optional context path (`host[/path…]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route: String,
    pub port: u16,
    pub ip: String,
    pub ttl: i64,
    pub log_guid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl Route {
    pub fn identity_key(&self) -> String {
        format!("{},{}:{}", self.route, self.ip, self.port)
    }
}

/// A TCP (layer-4) route mapping: a reserved external port on a router
/// group forwarding to one backend.
///
/// Identity is `(router_group_guid, external_port, backend_ip, backend_port)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpRouteMapping {
    pub router_group_guid: String,
    /// Wire field name is `port`, matching the Route struct's field for the
    /// same semantic role (the externally reserved port).
    #[serde(rename = "port")]
    pub external_port: u16,
    pub backend_ip: String,
    pub backend_port: u16,
    pub ttl: i64,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl TcpRouteMapping {
    pub fn identity_key(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.router_group_guid, self.external_port, self.backend_ip, self.backend_port
        )
    }
}

/// The kind of router group: which fleet it governs port reservations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterGroupType {
    Tcp,
    Http,
}

/// A named namespace of reservable external TCP ports.
///
/// Identity is `guid`. `name` is unique across all router groups and
/// immutable after creation; `guid` is required and immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterGroup {
    pub guid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RouterGroupType,
    /// Comma-separated list of `<n>` or `<start>-<end>` port ranges.
    pub reservable_ports: String,
}

/// A single inclusive port range parsed out of `RouterGroup::reservable_ports`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

impl RouterGroup {
    /// Parses `reservable_ports` into a list of ranges. Does not validate
    /// ordering or overlap; see [`crate::validate::validate_router_group`].
    pub fn parse_reservable_ports(&self) -> Result<Vec<PortRange>, String> {
        parse_port_ranges(&self.reservable_ports)
    }
}

pub fn parse_port_ranges(spec: &str) -> Result<Vec<PortRange>, String> {
    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("empty range segment in {spec:?}"));
        }
        let (start, end) = match part.split_once('-') {
            Some((s, e)) => {
                let start: u16 = s
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid range start {s:?}"))?;
                let end: u16 = e
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid range end {e:?}"))?;
                (start, end)
            }
            None => {
                let port: u16 = part
                    .parse()
                    .map_err(|_| format!("invalid port {part:?}"))?;
                (port, port)
            }
        };
        if start > end {
            return Err(format!("range start {start} greater than end {end}"));
        }
        ranges.push(PortRange { start, end });
    }
    Ok(ranges)
}

/// A classified change to a stored route or TCP mapping, as delivered to
/// event-hub subscribers. `Create`/`Update` are coarsened to `Upsert` on the
/// wire (see [`crate::api`]); they stay distinct here for the sync
/// client and for tests that care about the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Expire,
}

impl ChangeKind {
    /// Wire event name: `Upsert` for Create/Update, `Delete` for Delete/Expire.
    pub fn wire_name(self) -> &'static str {
        match self {
            ChangeKind::Create | ChangeKind::Update => "Upsert",
            ChangeKind::Delete | ChangeKind::Expire => "Delete",
        }
    }
}

/// A single change event for one family (HTTP routes or TCP mappings),
/// generic over the payload type so the hub and store can be shared code.
#[derive(Debug, Clone)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub index: u64,
    pub payload: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_deserializes_without_a_modification_tag() {
        let json = r#"{"route":"a.b.c","port":33,"ip":"1.1.1.1","ttl":55,"log_guid":"x"}"#;
        let route: Route = serde_json::from_str(json).unwrap();
        assert_eq!(route.route, "a.b.c");
        assert_eq!(route.modification_tag.index, 0);
    }

    #[test]
    fn tcp_route_mapping_deserializes_without_a_modification_tag() {
        let json = r#"{"router_group_guid":"G1","port":1025,"backend_ip":"10.0.0.1","backend_port":80,"ttl":30}"#;
        let mapping: TcpRouteMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.router_group_guid, "G1");
        assert_eq!(mapping.external_port, 1025);
    }
}

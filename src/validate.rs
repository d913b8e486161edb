//! Pure, synchronous validation of routes, TCP route mappings, and router groups.
//!
//! Nothing in this module suspends or talks to the store; it only inspects
//! the payload (and, for TCP mappings, the referring router group already
//! loaded by the caller).

use url::Url;

use crate::error::RegistryError;
use crate::model::{Route, RouterGroup, RouterGroupType, TcpRouteMapping};

fn validate_ttl(ttl: i64, max_ttl: i64) -> Result<(), String> {
    if ttl <= 0 {
        return Err(format!("ttl must be positive, got {ttl}"));
    }
    if ttl > max_ttl {
        return Err(format!("ttl {ttl} exceeds max_ttl {max_ttl}"));
    }
    Ok(())
}

fn validate_port(port: u16, field: &str) -> Result<(), String> {
    if port == 0 {
        return Err(format!("{field} must be in [1, 65535], got 0"));
    }
    Ok(())
}

pub fn validate_route(route: &Route, max_ttl: i64) -> Result<(), RegistryError> {
    if route.route.trim().is_empty() {
        return Err(RegistryError::RouteInvalid("route host must not be empty".into()));
    }

    let host = route.route.split('/').next().unwrap_or("");
    if host.is_empty() {
        return Err(RegistryError::RouteInvalid(
            "route must have a non-empty host".into(),
        ));
    }

    if route
        .route
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(RegistryError::RouteInvalid(
            "route must not contain whitespace or control characters".into(),
        ));
    }

    validate_port(route.port, "port").map_err(RegistryError::RouteInvalid)?;
    validate_ttl(route.ttl, max_ttl).map_err(RegistryError::RouteInvalid)?;

    if let Some(url) = &route.route_service_url {
        let parsed = Url::parse(url)
            .map_err(|e| RegistryError::RouteServiceUrlInvalid(format!("{url}: {e}")))?;
        if parsed.scheme() != "https" {
            return Err(RegistryError::RouteServiceUrlInvalid(format!(
                "route_service_url must use https, got {:?}",
                parsed.scheme()
            )));
        }
    }

    Ok(())
}

pub fn validate_tcp_route_mapping(
    mapping: &TcpRouteMapping,
    router_group: &RouterGroup,
    max_ttl: i64,
) -> Result<(), RegistryError> {
    if mapping.backend_ip.parse::<std::net::Ipv4Addr>().is_err() {
        return Err(RegistryError::TcpRouteMappingInvalid(format!(
            "backend_ip {:?} is not a valid IPv4 address",
            mapping.backend_ip
        )));
    }

    validate_port(mapping.backend_port, "backend_port")
        .map_err(RegistryError::TcpRouteMappingInvalid)?;
    validate_ttl(mapping.ttl, max_ttl).map_err(RegistryError::TcpRouteMappingInvalid)?;

    let ranges = router_group
        .parse_reservable_ports()
        .map_err(RegistryError::TcpRouteMappingInvalid)?;
    if !ranges.iter().any(|r| r.contains(mapping.external_port)) {
        return Err(RegistryError::TcpRouteMappingInvalid(format!(
            "external_port {} is not within router group {:?}'s reservable_ports {:?}",
            mapping.external_port, router_group.guid, router_group.reservable_ports
        )));
    }

    Ok(())
}

pub fn validate_router_group(rg: &RouterGroup) -> Result<(), RegistryError> {
    if rg.guid.trim().is_empty() {
        return Err(RegistryError::RouterGroupInvalid("guid must not be empty".into()));
    }

    if !matches!(rg.kind, RouterGroupType::Tcp | RouterGroupType::Http) {
        return Err(RegistryError::RouterGroupInvalid(
            "type must be tcp or http".into(),
        ));
    }

    let ranges = rg
        .parse_reservable_ports()
        .map_err(RegistryError::RouterGroupInvalid)?;
    if ranges.is_empty() {
        return Err(RegistryError::RouterGroupInvalid(
            "reservable_ports must not be empty".into(),
        ));
    }

    let mut sorted = ranges.clone();
    sorted.sort_by_key(|r| r.start);
    for pair in sorted.windows(2) {
        if pair[0].end >= pair[1].start {
            return Err(RegistryError::RouterGroupInvalid(format!(
                "reservable_ports ranges overlap: {:?}-{:?} and {:?}-{:?}",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModificationTag;

    fn sample_route() -> Route {
        Route {
            route: "a.b.c".into(),
            port: 33,
            ip: "1.1.1.1".into(),
            ttl: 55,
            log_guid: "x".into(),
            route_service_url: None,
            modification_tag: ModificationTag::fresh(),
        }
    }

    #[test]
    fn accepts_valid_route() {
        assert!(validate_route(&sample_route(), 120).is_ok());
    }

    #[test]
    fn rejects_empty_host() {
        let mut r = sample_route();
        r.route = "".into();
        assert!(validate_route(&r, 120).is_err());
    }

    #[test]
    fn rejects_non_https_route_service_url() {
        let mut r = sample_route();
        r.route_service_url = Some("http://example.com".into());
        let err = validate_route(&r, 120).unwrap_err();
        assert!(matches!(err, RegistryError::RouteServiceUrlInvalid(_)));
    }

    #[test]
    fn rejects_ttl_over_max() {
        let mut r = sample_route();
        r.ttl = 1000;
        assert!(validate_route(&r, 120).is_err());
    }

    #[test]
    fn router_group_rejects_overlapping_ranges() {
        let rg = RouterGroup {
            guid: "g1".into(),
            name: "default-tcp".into(),
            kind: RouterGroupType::Tcp,
            reservable_ports: "1024-2048,2000-3000".into(),
        };
        assert!(validate_router_group(&rg).is_err());
    }

    #[test]
    fn tcp_mapping_rejects_port_outside_reservation() {
        let rg = RouterGroup {
            guid: "g1".into(),
            name: "default-tcp".into(),
            kind: RouterGroupType::Tcp,
            reservable_ports: "1024-65535".into(),
        };
        let mapping = TcpRouteMapping {
            router_group_guid: "g1".into(),
            external_port: 80,
            backend_ip: "10.0.0.1".into(),
            backend_port: 8080,
            ttl: 30,
            modification_tag: ModificationTag::fresh(),
        };
        let err = validate_tcp_route_mapping(&mapping, &rg, 120).unwrap_err();
        assert!(matches!(err, RegistryError::TcpRouteMappingInvalid(_)));
    }
}

//! Host port allocation
//!
//! Every resource publishes two host ports: a control port (SSH) and a service
//! port. Both are allocated by scanning upward from a floor, bounded by a
//! window. Only *running* resources hold their ports; a stopped resource's
//! ports may be handed out again, and a rebuild keeps the ports recorded in the
//! resource's labels.

use crate::errors::{PortError, Result};
use crate::runtime::{ContainerRuntime, Resource};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// Scan origins for the two port spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortFloors {
    pub control: u16,
    pub service: u16,
}

/// An allocated control/service port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub control: u16,
    pub service: u16,
}

/// First port in `floor..floor+window` for which `is_used` is false
pub fn find_free_port(
    floor: u16,
    window: u16,
    is_used: impl Fn(u16) -> bool,
) -> std::result::Result<u16, PortError> {
    for offset in 0..window {
        let Some(candidate) = floor.checked_add(offset) else {
            break;
        };
        if !is_used(candidate) {
            return Ok(candidate);
        }
    }
    Err(PortError::Exhausted {
        floor,
        end: u32::from(floor) + u32::from(window),
        window,
    })
}

/// Host ports held by running resources
pub fn ports_in_use(resources: &[Resource]) -> BTreeSet<u16> {
    resources
        .iter()
        .filter(|r| r.is_running())
        .flat_map(|r| [r.control_port, r.service_port])
        .collect()
}

/// Lowest offset at which both port spaces are free
///
/// The service port always sits at the same distance from its floor as the
/// control port, so `2203` pairs with `3003`.
pub fn find_free_pair(
    floors: PortFloors,
    window: u16,
    used: &BTreeSet<u16>,
) -> std::result::Result<PortPair, PortError> {
    let control = find_free_port(floors.control, window, |candidate| {
        let offset = candidate - floors.control;
        match floors.service.checked_add(offset) {
            Some(service) => used.contains(&candidate) || used.contains(&service),
            None => true,
        }
    })?;
    Ok(PortPair {
        control,
        service: floors.service + (control - floors.control),
    })
}

/// Allocate a pair against a fresh listing from the runtime
#[instrument(skip(runtime))]
pub async fn allocate_pair<R: ContainerRuntime>(
    runtime: &R,
    floors: PortFloors,
    window: u16,
) -> Result<PortPair> {
    let resources = runtime.list().await?;
    let used = ports_in_use(&resources);
    debug!("{} host ports in use by running resources", used.len());
    let pair = find_free_pair(floors, window, &used)?;
    debug!(control = pair.control, service = pair.service, "Allocated port pair");
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::ResourceStatus;
    use std::collections::BTreeMap;

    fn resource(name: &str, control: u16, service: u16, status: ResourceStatus) -> Resource {
        Resource {
            name: name.to_string(),
            image: "img".to_string(),
            control_port: control,
            service_port: service,
            status,
            labels: BTreeMap::new(),
            created_at: None,
        }
    }

    const FLOORS: PortFloors = PortFloors {
        control: 2200,
        service: 3000,
    };

    #[test]
    fn test_first_port_when_nothing_running() {
        assert_eq!(find_free_port(2200, 10, |_| false).unwrap(), 2200);
    }

    #[test]
    fn test_skips_used_ports() {
        let used: BTreeSet<u16> = [2200, 2201, 2203].into_iter().collect();
        assert_eq!(
            find_free_port(2200, 10, |p| used.contains(&p)).unwrap(),
            2202
        );
    }

    #[test]
    fn test_window_exhausted() {
        let err = find_free_port(2200, 3, |_| true).unwrap_err();
        let PortError::Exhausted { floor, end, window } = err;
        assert_eq!((floor, end, window), (2200, 2203, 3));
    }

    #[test]
    fn test_scan_stops_at_u16_max() {
        assert!(find_free_port(u16::MAX - 1, 10, |_| true).is_err());
        assert_eq!(find_free_port(u16::MAX, 10, |_| false).unwrap(), u16::MAX);
    }

    #[test]
    fn test_stopped_resources_release_ports() {
        let resources = vec![
            resource("a", 2200, 3000, ResourceStatus::Running),
            resource("b", 2201, 3001, ResourceStatus::Stopped),
            resource("c", 2202, 3002, ResourceStatus::Created),
        ];
        let used = ports_in_use(&resources);
        assert_eq!(used.into_iter().collect::<Vec<_>>(), vec![2200, 3000]);

        let pair = find_free_pair(FLOORS, 10, &ports_in_use(&resources)).unwrap();
        assert_eq!(
            pair,
            PortPair {
                control: 2201,
                service: 3001
            }
        );
    }

    #[test]
    fn test_pair_keeps_fixed_offset() {
        let resources = vec![
            resource("a", 2200, 3000, ResourceStatus::Running),
            resource("b", 2201, 3001, ResourceStatus::Running),
            resource("c", 2205, 3002, ResourceStatus::Running),
        ];
        let pair = find_free_pair(FLOORS, 10, &ports_in_use(&resources)).unwrap();
        assert_eq!(
            pair,
            PortPair {
                control: 2203,
                service: 3003
            }
        );
    }

    #[test]
    fn test_pair_skips_offset_taken_in_either_space() {
        let used: BTreeSet<u16> = [3000, 2201].into_iter().collect();
        let pair = find_free_pair(FLOORS, 10, &used).unwrap();
        assert_eq!(pair.control, 2202);
        assert_eq!(pair.service, 3002);
    }

    #[tokio::test]
    async fn test_allocate_pair_uses_runtime_listing() {
        let runtime = MockRuntime::new();
        runtime.add_resource(resource("a", 2200, 3000, ResourceStatus::Running));
        let pair = allocate_pair(&runtime, FLOORS, 5).await.unwrap();
        assert_eq!(pair.control, 2201);
        assert_eq!(pair.service, 3001);
    }

    #[tokio::test]
    async fn test_allocate_pair_exhaustion_is_port_error() {
        let runtime = MockRuntime::new();
        runtime.add_resource(resource("a", 2200, 3000, ResourceStatus::Running));
        let err = allocate_pair(&runtime, FLOORS, 1).await.unwrap_err();
        assert!(matches!(err, crate::errors::BurrowError::Port(_)));
    }
}

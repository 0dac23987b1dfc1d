//! Port reservation table.
//!
//! The table is authoritative: a port appears at most once, and entries are
//! never removed. Status moves `reserved -> active` on spawn and back on stop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use warden_core::{ServiceDescriptor, ServiceId};

use crate::error::SupervisorError;

pub const DEFAULT_PORT_FLOOR: u16 = 7000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Reserved,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortReservation {
    pub service: ServiceId,
    pub status: PortStatus,
    pub auto_start: bool,
    pub dependencies: Vec<ServiceId>,
    pub last_used: Option<DateTime<Utc>>,
}

impl PortReservation {
    fn new(service: ServiceId) -> Self {
        Self {
            service,
            status: PortStatus::Reserved,
            auto_start: false,
            dependencies: Vec::new(),
            last_used: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortAllocator {
    table: BTreeMap<u16, PortReservation>,
    floor: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_FLOOR)
    }
}

impl PortAllocator {
    pub fn new(floor: u16) -> Self {
        Self {
            table: BTreeMap::new(),
            floor,
        }
    }

    pub fn floor(&self) -> u16 {
        self.floor
    }

    /// Reserve `port` for `service`. Returns `false` without touching the
    /// table when the port is already present.
    pub fn reserve(&mut self, port: u16, service: impl Into<ServiceId>) -> bool {
        if self.table.contains_key(&port) {
            return false;
        }
        let service = service.into();
        tracing::debug!(port, service = %service, "port reserved");
        self.table.insert(port, PortReservation::new(service));
        true
    }

    /// Reserve a registry entry's fixed port, recording its launch metadata.
    /// Descriptors without a port are not reserved.
    pub fn reserve_static(&mut self, descriptor: &ServiceDescriptor) -> bool {
        let Some(port) = descriptor.port else {
            return false;
        };
        if !self.reserve(port, descriptor.id.clone()) {
            return false;
        }
        if let Some(entry) = self.table.get_mut(&port) {
            entry.auto_start = descriptor.auto_start;
            entry.dependencies = descriptor.dependencies.clone();
        }
        true
    }

    /// Lowest port at or above `floor` with no reservation.
    pub fn next_available(&self, floor: u16) -> Option<u16> {
        (floor..=u16::MAX).find(|port| !self.table.contains_key(port))
    }

    /// Reserve the next free port at or above the configured floor.
    pub fn auto_assign(&mut self, service: impl Into<ServiceId>) -> Result<u16, SupervisorError> {
        let port = self
            .next_available(self.floor)
            .ok_or(SupervisorError::NoFreePort { floor: self.floor })?;
        self.reserve(port, service);
        Ok(port)
    }

    pub fn mark_active(&mut self, port: u16) {
        if let Some(entry) = self.table.get_mut(&port) {
            entry.status = PortStatus::Active;
            entry.last_used = Some(Utc::now());
        }
    }

    pub fn mark_stopped(&mut self, port: u16) {
        if let Some(entry) = self.table.get_mut(&port) {
            entry.status = PortStatus::Reserved;
        }
    }

    pub fn get(&self, port: u16) -> Option<&PortReservation> {
        self.table.get(&port)
    }

    /// The port reserved for `service`, if any.
    pub fn port_of(&self, service: &ServiceId) -> Option<u16> {
        self.table
            .iter()
            .find(|(_, entry)| &entry.service == service)
            .map(|(port, _)| *port)
    }

    pub fn is_active(&self, service: &ServiceId) -> bool {
        self.table
            .values()
            .any(|entry| &entry.service == service && entry.status == PortStatus::Active)
    }

    pub fn active_ports(&self) -> Vec<u16> {
        self.table
            .iter()
            .filter(|(_, entry)| entry.status == PortStatus::Active)
            .map(|(port, _)| *port)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<(u16, PortReservation)> {
        self.table
            .iter()
            .map(|(port, entry)| (*port, entry.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_reservation_of_a_port_fails() {
        let mut ports = PortAllocator::default();
        assert!(ports.reserve(4001, "svc-a"));
        assert!(!ports.reserve(4001, "svc-b"));
        assert_eq!(ports.get(4001).map(|r| r.service.0.as_str()), Some("svc-a"));
        assert_eq!(ports.len(), 1);
    }

    #[test]
    fn auto_assign_skips_occupied_ports() {
        let mut ports = PortAllocator::new(7000);
        assert!(ports.reserve(7000, "fixed"));
        assert!(ports.reserve(7002, "other"));

        let first = ports.auto_assign("a").expect("port");
        let second = ports.auto_assign("b").expect("port");
        assert_eq!(first, 7001);
        assert_eq!(second, 7003);
    }

    #[test]
    fn status_transitions() {
        let mut ports = PortAllocator::default();
        let id = ServiceId::from("api");
        ports.reserve(5000, id.clone());
        assert!(!ports.is_active(&id));

        ports.mark_active(5000);
        assert!(ports.is_active(&id));
        assert!(ports.get(5000).and_then(|r| r.last_used).is_some());
        assert_eq!(ports.active_ports(), vec![5000]);

        ports.mark_stopped(5000);
        assert_eq!(ports.get(5000).map(|r| r.status), Some(PortStatus::Reserved));

        // Unknown ports are ignored.
        ports.mark_active(6000);
        assert!(ports.get(6000).is_none());
    }

    #[test]
    fn static_reservation_records_metadata() {
        let mut ports = PortAllocator::default();
        let descriptor = ServiceDescriptor::new("wallet", "npm start")
            .with_port(5001)
            .with_dependencies(["pss"])
            .with_auto_start(false);
        assert!(ports.reserve_static(&descriptor));
        let entry = ports.get(5001).expect("reserved");
        assert_eq!(entry.dependencies, vec![ServiceId::from("pss")]);
        assert!(!entry.auto_start);

        let floating = ServiceDescriptor::new("worker", "npm start");
        assert!(!ports.reserve_static(&floating));
    }
}

// ── Directory cache ──
//
// Known services with id and name indices. Every mutation reports what
// changed so the item watchlist can react (recover, close, re-admit).

use std::collections::{BTreeMap, HashMap};

use streamwatch_api::{MapAction, Service, ServiceState};

/// Externally visible effect of applying one service entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChange {
    pub service_id: u16,
    pub name: Option<String>,
    /// Usable before the change. `None` if the service was unknown.
    pub was_up: Option<bool>,
    /// Usable after the change. `None` if the service is gone.
    pub is_up: Option<bool>,
    pub accepting_requests: bool,
    pub open_window: Option<u32>,
}

impl ServiceChange {
    pub fn deleted(&self) -> bool {
        self.is_up.is_none()
    }

    /// The service stopped being usable (deleted or went down).
    pub fn lost(&self) -> bool {
        self.was_up == Some(true) && self.is_up != Some(true)
    }

    /// The service became usable (appeared up, or came back up).
    pub fn gained(&self) -> bool {
        self.is_up == Some(true) && self.was_up != Some(true)
    }
}

#[derive(Debug, Default)]
pub struct DirectoryCache {
    by_id: BTreeMap<u16, Service>,
    name_to_id: HashMap<String, u16>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one entry: `Add` replaces, `Update` merges the sections it
    /// carries, `Delete` removes. An `Update` for an unknown id is an add.
    pub fn apply(&mut self, entry: &Service) -> Option<ServiceChange> {
        if entry.action == MapAction::Delete {
            return self.remove(entry.service_id).map(|old| ServiceChange {
                service_id: old.service_id,
                name: old.name().map(str::to_owned),
                was_up: Some(old.is_up()),
                is_up: None,
                accepting_requests: false,
                open_window: None,
            });
        }

        let old = self.by_id.get(&entry.service_id);
        let was_up = old.map(Service::is_up);
        let old_name = old.and_then(Service::name).map(str::to_owned);

        let merged = match (entry.action, old) {
            (MapAction::Update, Some(existing)) => merge(existing, entry),
            _ => Service {
                action: MapAction::Add,
                ..entry.clone()
            },
        };

        if let Some(name) = old_name.as_deref() {
            if merged.name() != Some(name) {
                self.name_to_id.remove(name);
            }
        }
        if let Some(name) = merged.name() {
            // A name resolves to one live service; a newer id takes it over.
            if let Some(prev) = self.name_to_id.insert(name.to_owned(), merged.service_id) {
                if prev != merged.service_id {
                    tracing::warn!(
                        service_name = name,
                        old_id = prev,
                        new_id = merged.service_id,
                        "service name moved to a new id"
                    );
                }
            }
        }

        let change = ServiceChange {
            service_id: merged.service_id,
            name: merged.name().map(str::to_owned),
            was_up,
            is_up: Some(merged.is_up()),
            accepting_requests: merged.accepting_requests(),
            open_window: merged.open_window(),
        };
        self.by_id.insert(merged.service_id, merged);
        Some(change)
    }

    /// Remove a service from both indices. Returns the removed entry.
    pub fn remove(&mut self, service_id: u16) -> Option<Service> {
        let removed = self.by_id.remove(&service_id)?;
        if let Some(name) = removed.name() {
            if self.name_to_id.get(name) == Some(&service_id) {
                self.name_to_id.remove(name);
            }
        }
        Some(removed)
    }

    pub fn by_id(&self, service_id: u16) -> Option<&Service> {
        self.by_id.get(&service_id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Service> {
        self.by_id.get(self.name_to_id.get(name)?)
    }

    pub fn id_for_name(&self, name: &str) -> Option<u16> {
        self.name_to_id.get(name).copied()
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.by_id.values()
    }

    pub fn ids(&self) -> Vec<u16> {
        self.by_id.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.name_to_id.clear();
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Merge the sections present in `update` over `existing`.
fn merge(existing: &Service, update: &Service) -> Service {
    let mut merged = existing.clone();
    if let Some(info) = &update.info {
        merged.info = Some(info.clone());
    }
    if let Some(state) = &update.state {
        let current = merged.state.get_or_insert_with(ServiceState::default);
        current.up = state.up;
        if state.accepting_requests.is_some() {
            current.accepting_requests = state.accepting_requests;
        }
        if state.status.is_some() {
            current.status.clone_from(&state.status);
        }
    }
    if let Some(load) = &update.load {
        let current = merged.load.get_or_insert_with(Default::default);
        if load.open_limit.is_some() {
            current.open_limit = load.open_limit;
        }
        if load.open_window.is_some() {
            current.open_window = load.open_window;
        }
        if load.load_factor.is_some() {
            current.load_factor = load.load_factor;
        }
    }
    for group in &update.groups {
        if let Some(existing) = merged.groups.iter_mut().find(|g| g.group == group.group) {
            *existing = group.clone();
        } else {
            merged.groups.push(group.clone());
        }
    }
    merged
}

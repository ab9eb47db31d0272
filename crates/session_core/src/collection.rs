use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

use crate::observer::{ObserverId, ObserverList};

/// Assigns `$value` to `$target` and records `$name` in `$changed` when
/// they differ. For use in [`Entity::apply`].
macro_rules! update_field {
    ($changed:ident, $target:expr, $value:expr, $name:literal) => {
        if $target != $value {
            $target = $value;
            $changed.push($name);
        }
    };
}

pub(crate) use update_field;

/// A domain object kept in a [`SynchronizedCollection`].
pub trait Entity: Sized + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    type Update;

    fn create(id: Self::Id, update: Self::Update) -> Self;

    /// Applies `update` and reports the names of the fields that changed.
    fn apply(&mut self, update: Self::Update) -> Vec<&'static str>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent<Id> {
    Added(Id),
    Changed { id: Id, field: &'static str },
    Died(Id),
    Revived(Id),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchState {
    #[default]
    Idle,
    Fetching,
    /// Invalidated while fetching; one more full pass is owed.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyFetching;

/// Proof of an outstanding refresh pass; close it with
/// [`SynchronizedCollection::end_refresh`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct RefreshToken {
    generation: u64,
}

impl RefreshToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Back to idle; the caller should now expire outdated entities.
    Completed,
    /// Invalidated mid-pass: discard what was fetched and run this pass.
    Restart(RefreshToken),
    /// The token predates a clear; nothing to do.
    Discarded,
}

/// Stable reference to an arena slot. Goes stale once the slot is freed.
pub struct EntityHandle<T> {
    index: usize,
    version: u32,
    _entity: PhantomData<fn() -> T>,
}

impl<T> EntityHandle<T> {
    fn new(index: usize, version: u32) -> Self {
        Self {
            index,
            version,
            _entity: PhantomData,
        }
    }
}

impl<T> Clone for EntityHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityHandle<T> {}

impl<T> PartialEq for EntityHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.version == other.version
    }
}

impl<T> Eq for EntityHandle<T> {}

impl<T> Hash for EntityHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.version.hash(state);
    }
}

impl<T> fmt::Debug for EntityHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityHandle({}v{})", self.index, self.version)
    }
}

struct Slot<T: Entity> {
    entity: T,
    id: T::Id,
    name: String,
    generation: u64,
    live: bool,
    ever_live: bool,
    holders: usize,
}

/// Generation-stamped registry indexed by id and by display name.
///
/// The collection is one owner of each live entity; other holders (a
/// conversation's members, a meeting's organiser) take holds via
/// [`retain`](Self::retain). A dead entity stays readable as a tombstone
/// until its last hold is released.
pub struct SynchronizedCollection<T: Entity> {
    slots: Vec<Option<Slot<T>>>,
    versions: Vec<u32>,
    free: Vec<usize>,
    by_id: HashMap<T::Id, usize>,
    by_name: HashMap<String, usize>,
    generation: u64,
    state: FetchState,
    observers: ObserverList<CollectionEvent<T::Id>>,
    freed: Vec<T>,
}

impl<T: Entity> Default for SynchronizedCollection<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            versions: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            generation: 0,
            state: FetchState::Idle,
            observers: ObserverList::default(),
            freed: Vec::new(),
        }
    }
}

impl<T: Entity> SynchronizedCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        observer: impl Fn(&CollectionEvent<T::Id>) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(observer)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fetch_state(&self) -> FetchState {
        self.state
    }

    /// Inserts or updates a live entity and stamps it with the current
    /// generation. Identical updates produce no notifications.
    pub fn upsert(&mut self, id: T::Id, name: &str, update: T::Update) -> EntityHandle<T> {
        let index = match self.by_id.get(&id) {
            Some(&index) => {
                self.update_slot(index, name, update);
                if let Some(slot) = self.slots[index].as_mut() {
                    slot.generation = self.generation;
                    if !slot.live {
                        slot.live = true;
                        self.by_name.insert(slot.name.clone(), index);
                        // First appearance of something only referenced so far.
                        let event = if std::mem::replace(&mut slot.ever_live, true) {
                            CollectionEvent::Revived(id)
                        } else {
                            CollectionEvent::Added(id)
                        };
                        self.observers.notify(&event);
                    }
                }
                index
            }
            None => {
                let index = self.insert_slot(id.clone(), name, update, true);
                self.observers.notify(&CollectionEvent::Added(id));
                index
            }
        };
        EntityHandle::new(index, self.versions[index])
    }

    /// Inserts or updates an entity known only through another object,
    /// without making it live. The caller owns one hold on the result.
    pub fn reference(&mut self, id: T::Id, name: &str, update: T::Update) -> EntityHandle<T> {
        let index = match self.by_id.get(&id) {
            Some(&index) => {
                self.update_slot(index, name, update);
                index
            }
            None => self.insert_slot(id, name, update, false),
        };
        if let Some(slot) = self.slots[index].as_mut() {
            slot.holders += 1;
        }
        EntityHandle::new(index, self.versions[index])
    }

    /// Applies a field-level change to an existing entity, live or not.
    pub fn modify(
        &mut self,
        id: &T::Id,
        change: impl FnOnce(&mut T) -> Vec<&'static str>,
    ) -> bool {
        let Some(&index) = self.by_id.get(id) else {
            return false;
        };
        let Some(slot) = self.slots[index].as_mut() else {
            return false;
        };
        let changed = change(&mut slot.entity);
        for field in changed {
            self.observers.notify(&CollectionEvent::Changed {
                id: id.clone(),
                field,
            });
        }
        true
    }

    pub fn retain(&mut self, handle: EntityHandle<T>) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.holders += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one hold; a dead entity with no holds left is freed.
    pub fn release(&mut self, handle: EntityHandle<T>) {
        let Some(slot) = self.slot_mut(handle) else {
            return;
        };
        slot.holders = slot.holders.saturating_sub(1);
        if !slot.live && slot.holders == 0 {
            self.free_slot(handle.index);
        }
    }

    /// Marks a live entity dead ahead of the next refresh.
    pub fn kill(&mut self, id: &T::Id) -> bool {
        match self.by_id.get(id) {
            Some(&index) => self.kill_slot(index),
            None => false,
        }
    }

    /// Starts a full pass unless one is already running, in which case the
    /// running pass is marked stale so it restarts when it ends.
    pub fn begin_refresh(&mut self) -> Result<RefreshToken, AlreadyFetching> {
        match self.state {
            FetchState::Idle => {
                self.generation += 1;
                self.state = FetchState::Fetching;
                Ok(RefreshToken {
                    generation: self.generation,
                })
            }
            FetchState::Fetching | FetchState::Stale => {
                self.state = FetchState::Stale;
                Err(AlreadyFetching)
            }
        }
    }

    /// Whether results for `token` should be thrown away.
    pub fn is_stale(&self, token: &RefreshToken) -> bool {
        token.generation != self.generation || self.state != FetchState::Fetching
    }

    pub fn end_refresh(&mut self, token: RefreshToken) -> RefreshOutcome {
        if token.generation != self.generation || self.state == FetchState::Idle {
            return RefreshOutcome::Discarded;
        }
        match self.state {
            FetchState::Stale => {
                self.generation += 1;
                self.state = FetchState::Fetching;
                RefreshOutcome::Restart(RefreshToken {
                    generation: self.generation,
                })
            }
            _ => {
                self.state = FetchState::Idle;
                RefreshOutcome::Completed
            }
        }
    }

    /// Gives up on a failed pass so the next `begin_refresh` can start.
    pub fn abandon_refresh(&mut self, token: RefreshToken) {
        if token.generation == self.generation {
            self.state = FetchState::Idle;
        }
    }

    /// Kills every live entity not confirmed by the current generation.
    pub fn expire_outdated(&mut self) -> usize {
        let outdated: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|slot| slot.live && slot.generation != self.generation)
                    .map(|_| index)
            })
            .collect();
        outdated
            .into_iter()
            .filter(|&index| self.kill_slot(index))
            .count()
    }

    pub fn get(&self, handle: EntityHandle<T>) -> Option<&T> {
        self.slot(handle).map(|slot| &slot.entity)
    }

    pub fn is_live(&self, handle: EntityHandle<T>) -> bool {
        self.slot(handle).is_some_and(|slot| slot.live)
    }

    pub fn handle_of(&self, id: &T::Id) -> Option<EntityHandle<T>> {
        self.by_id
            .get(id)
            .map(|&index| EntityHandle::new(index, self.versions[index]))
    }

    pub fn by_id(&self, id: &T::Id) -> Option<&T> {
        let index = *self.by_id.get(id)?;
        self.slots[index]
            .as_ref()
            .filter(|slot| slot.live)
            .map(|slot| &slot.entity)
    }

    /// Includes tombstones still held elsewhere.
    pub fn any_by_id(&self, id: &T::Id) -> Option<&T> {
        let index = *self.by_id.get(id)?;
        self.slots[index].as_ref().map(|slot| &slot.entity)
    }

    pub fn by_name(&self, name: &str) -> Option<&T> {
        let index = *self.by_name.get(name)?;
        self.slots[index]
            .as_ref()
            .filter(|slot| slot.live)
            .map(|slot| &slot.entity)
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.live)
            .map(|slot| &slot.entity)
    }

    pub fn live_len(&self) -> usize {
        self.iter_live().count()
    }

    /// Live entities plus tombstones still held elsewhere.
    pub fn allocated(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Entities whose slots were freed since the last call, so holds they
    /// carry on other collections can be released.
    pub fn take_freed(&mut self) -> Vec<T> {
        std::mem::take(&mut self.freed)
    }

    /// Drops every entity and invalidates every handle. Observers stay.
    pub fn clear(&mut self) {
        self.freed.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.take().is_some() {
                self.versions[index] = self.versions[index].wrapping_add(1);
                self.free.push(index);
            }
        }
        self.by_id.clear();
        self.by_name.clear();
        self.state = FetchState::Idle;
        // A refresh token issued before the clear must not complete.
        self.generation += 1;
    }

    fn slot(&self, handle: EntityHandle<T>) -> Option<&Slot<T>> {
        if self.versions.get(handle.index) != Some(&handle.version) {
            return None;
        }
        self.slots.get(handle.index)?.as_ref()
    }

    fn slot_mut(&mut self, handle: EntityHandle<T>) -> Option<&mut Slot<T>> {
        if self.versions.get(handle.index) != Some(&handle.version) {
            return None;
        }
        self.slots.get_mut(handle.index)?.as_mut()
    }

    fn insert_slot(&mut self, id: T::Id, name: &str, update: T::Update, live: bool) -> usize {
        let slot = Slot {
            entity: T::create(id.clone(), update),
            id: id.clone(),
            name: name.to_string(),
            generation: self.generation,
            live,
            ever_live: live,
            holders: 0,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.versions.push(0);
                self.slots.len() - 1
            }
        };
        self.by_id.insert(id, index);
        if live {
            self.by_name.insert(name.to_string(), index);
        }
        index
    }

    fn update_slot(&mut self, index: usize, name: &str, update: T::Update) {
        let Some(slot) = self.slots[index].as_mut() else {
            return;
        };
        let mut changed = slot.entity.apply(update);
        if slot.name != name {
            if self.by_name.get(&slot.name) == Some(&index) {
                self.by_name.remove(&slot.name);
            }
            slot.name = name.to_string();
            if slot.live {
                self.by_name.insert(slot.name.clone(), index);
            }
            if !changed.contains(&"name") {
                changed.push("name");
            }
        }
        let id = slot.id.clone();
        for field in changed {
            self.observers.notify(&CollectionEvent::Changed {
                id: id.clone(),
                field,
            });
        }
    }

    fn kill_slot(&mut self, index: usize) -> bool {
        let Some(slot) = self.slots[index].as_mut() else {
            return false;
        };
        if !slot.live {
            return false;
        }
        slot.live = false;
        let id = slot.id.clone();
        let unheld = slot.holders == 0;
        if self.by_name.get(&slot.name) == Some(&index) {
            self.by_name.remove(&slot.name);
        }
        self.observers.notify(&CollectionEvent::Died(id));
        if unheld {
            self.free_slot(index);
        }
        true
    }

    fn free_slot(&mut self, index: usize) {
        let Some(slot) = self.slots[index].take() else {
            return;
        };
        if self.by_id.get(&slot.id) == Some(&index) {
            self.by_id.remove(&slot.id);
        }
        if self.by_name.get(&slot.name) == Some(&index) {
            self.by_name.remove(&slot.name);
        }
        self.versions[index] = self.versions[index].wrapping_add(1);
        self.free.push(index);
        self.freed.push(slot.entity);
    }
}

#[cfg(test)]
#[path = "tests/collection_tests.rs"]
mod tests;

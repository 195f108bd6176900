//! Binding registries: binding key → ordered callback list.
//!
//! Every registry carries its own `RwLock` so hook call sites can run the
//! `has_bindings_for` fast path without taking the state lock.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use mlua::{Lua, RegistryKey, Value};
use parking_lot::RwLock;

use crate::hooks::{
    BgEvents, CreatureEvents, GameObjectEvents, GossipEvents, GroupEvents, GuildEvents,
    HookEvent, InstanceEvents, ItemEvents, PacketEvents, PlayerEvents, RegisterType,
    ServerEvents, SpellEvents, VehicleEvents,
};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A key a registry can be indexed by.
pub trait BindingKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    fn event_id(&self) -> u32;
}

/// Event-wide key, e.g. every player login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey<E> {
    pub event: E,
}

/// Key scoped to one template entry, e.g. creature template 1234.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey<E> {
    pub event: E,
    pub entry: u32,
}

/// Key scoped to one spawned object in one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueObjectKey<E> {
    pub event: E,
    pub guid: u64,
    pub instance_id: u32,
}

impl<E> EventKey<E> {
    pub fn new(event: E) -> Self {
        Self { event }
    }
}

impl<E> EntryKey<E> {
    pub fn new(event: E, entry: u32) -> Self {
        Self { event, entry }
    }
}

impl<E> UniqueObjectKey<E> {
    pub fn new(event: E, guid: u64, instance_id: u32) -> Self {
        Self { event, guid, instance_id }
    }
}

impl<E: HookEvent> BindingKey for EventKey<E> {
    fn event_id(&self) -> u32 {
        self.event.id()
    }
}

impl<E: HookEvent> BindingKey for EntryKey<E> {
    fn event_id(&self) -> u32 {
        self.event.id()
    }
}

impl<E: HookEvent> BindingKey for UniqueObjectKey<E> {
    fn event_id(&self) -> u32 {
        self.event.id()
    }
}

// ---------------------------------------------------------------------------
// BindingMap
// ---------------------------------------------------------------------------

struct Binding {
    id: u64,
    /// 0 = unlimited.
    remaining_shots: u32,
    function: RegistryKey,
}

struct Inner<K> {
    bindings: HashMap<K, Vec<Binding>>,
    id_lookup: HashMap<u64, K>,
    max_id: u64,
}

pub struct BindingMap<K> {
    name: &'static str,
    inner: RwLock<Inner<K>>,
}

impl<K: BindingKey> BindingMap<K> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(Inner {
                bindings: HashMap::new(),
                id_lookup: HashMap::new(),
                max_id: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a callback for `key`. Returns the binding id used by `remove`.
    pub fn insert(&self, key: K, function: RegistryKey, shots: u32) -> u64 {
        let mut inner = self.inner.write();
        inner.max_id += 1;
        let id = inner.max_id;
        inner.id_lookup.insert(id, key.clone());
        inner.bindings.entry(key).or_default().push(Binding {
            id,
            remaining_shots: shots,
            function,
        });
        id
    }

    pub fn has_bindings_for(&self, key: &K) -> bool {
        self.inner
            .read()
            .bindings
            .get(key)
            .is_some_and(|list| !list.is_empty())
    }

    /// Append the callbacks for `key` to `out` in insertion order.
    ///
    /// Finite shot counters are decremented; a binding whose counter reaches
    /// zero is removed here, so this push is its last firing.
    pub fn push_refs_for(&self, key: &K, lua: &Lua, out: &mut Vec<Value>) -> mlua::Result<usize> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let Some(list) = inner.bindings.get_mut(key) else {
            return Ok(0);
        };

        let mut pushed = 0;
        let mut expired = Vec::new();
        for binding in list.iter_mut() {
            out.push(lua.registry_value::<Value>(&binding.function)?);
            pushed += 1;

            if binding.remaining_shots > 0 {
                binding.remaining_shots -= 1;
                if binding.remaining_shots == 0 {
                    expired.push(binding.id);
                }
            }
        }

        if !expired.is_empty() {
            list.retain(|b| !expired.contains(&b.id));
            if list.is_empty() {
                inner.bindings.remove(key);
            }
            for id in expired {
                inner.id_lookup.remove(&id);
            }
        }

        Ok(pushed)
    }

    /// Remove one binding by id. Returns false if it already expired.
    pub fn remove(&self, id: u64) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let Some(key) = inner.id_lookup.remove(&id) else {
            return false;
        };
        if let Some(list) = inner.bindings.get_mut(&key) {
            list.retain(|b| b.id != id);
            if list.is_empty() {
                inner.bindings.remove(&key);
            }
        }
        true
    }

    pub fn clear_key(&self, key: &K) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(list) = inner.bindings.remove(key) {
            for binding in list {
                inner.id_lookup.remove(&binding.id);
            }
        }
    }

    /// Remove every key matching `pred`.
    pub fn clear_where(&self, pred: impl Fn(&K) -> bool) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.bindings.retain(|key, _| !pred(key));
        inner.id_lookup.retain(|_, key| !pred(key));
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.bindings.clear();
        inner.id_lookup.clear();
    }

    /// Number of live bindings across all keys.
    pub fn len(&self) -> usize {
        self.inner.read().id_lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bind(&self, key: K) -> Bound<'_, K> {
        Bound { map: self, key }
    }
}

// ---------------------------------------------------------------------------
// Dispatch sources
// ---------------------------------------------------------------------------

/// One registry lookup the dispatch engine consults.
pub trait BindingQuery {
    fn has_bindings(&self) -> bool;
    fn push_refs(&self, lua: &Lua, out: &mut Vec<Value>) -> mlua::Result<usize>;
}

/// A registry paired with the key to look up.
pub struct Bound<'a, K> {
    map: &'a BindingMap<K>,
    key: K,
}

impl<K: BindingKey> BindingQuery for Bound<'_, K> {
    fn has_bindings(&self) -> bool {
        self.map.has_bindings_for(&self.key)
    }

    fn push_refs(&self, lua: &Lua, out: &mut Vec<Value>) -> mlua::Result<usize> {
        self.map.push_refs_for(&self.key, lua, out)
    }
}

// ---------------------------------------------------------------------------
// Bindings: every registry owned by one state
// ---------------------------------------------------------------------------

pub struct Bindings {
    pub server: BindingMap<EventKey<ServerEvents>>,
    pub player: BindingMap<EventKey<PlayerEvents>>,
    pub guild: BindingMap<EventKey<GuildEvents>>,
    pub group: BindingMap<EventKey<GroupEvents>>,
    pub vehicle: BindingMap<EventKey<VehicleEvents>>,
    pub bg: BindingMap<EventKey<BgEvents>>,

    pub packet: BindingMap<EntryKey<PacketEvents>>,
    pub creature: BindingMap<EntryKey<CreatureEvents>>,
    pub creature_gossip: BindingMap<EntryKey<GossipEvents>>,
    pub gameobject: BindingMap<EntryKey<GameObjectEvents>>,
    pub gameobject_gossip: BindingMap<EntryKey<GossipEvents>>,
    pub spell: BindingMap<EntryKey<SpellEvents>>,
    pub item: BindingMap<EntryKey<ItemEvents>>,
    pub item_gossip: BindingMap<EntryKey<GossipEvents>>,
    pub player_gossip: BindingMap<EntryKey<GossipEvents>>,
    pub map: BindingMap<EntryKey<InstanceEvents>>,
    pub instance: BindingMap<EntryKey<InstanceEvents>>,

    pub creature_unique: BindingMap<UniqueObjectKey<CreatureEvents>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self {
            server: BindingMap::new("ServerEvents"),
            player: BindingMap::new("PlayerEvents"),
            guild: BindingMap::new("GuildEvents"),
            group: BindingMap::new("GroupEvents"),
            vehicle: BindingMap::new("VehicleEvents"),
            bg: BindingMap::new("BGEvents"),

            packet: BindingMap::new("PacketEvents"),
            creature: BindingMap::new("CreatureEvents"),
            creature_gossip: BindingMap::new("GossipEvents (creature)"),
            gameobject: BindingMap::new("GameObjectEvents"),
            gameobject_gossip: BindingMap::new("GossipEvents (gameobject)"),
            spell: BindingMap::new("SpellEvents"),
            item: BindingMap::new("ItemEvents"),
            item_gossip: BindingMap::new("GossipEvents (item)"),
            player_gossip: BindingMap::new("GossipEvents (player)"),
            map: BindingMap::new("MapEvents"),
            instance: BindingMap::new("InstanceEvents"),

            creature_unique: BindingMap::new("CreatureEvents (unique)"),
        }
    }

    /// Remove one binding by registry family and id.
    pub fn remove(&self, reg_type: RegisterType, id: u64) -> bool {
        match reg_type {
            RegisterType::Server => self.server.remove(id),
            RegisterType::Player => self.player.remove(id),
            RegisterType::Guild => self.guild.remove(id),
            RegisterType::Group => self.group.remove(id),
            RegisterType::Vehicle => self.vehicle.remove(id),
            RegisterType::Bg => self.bg.remove(id),
            RegisterType::Packet => self.packet.remove(id),
            RegisterType::Creature => self.creature.remove(id),
            RegisterType::CreatureGossip => self.creature_gossip.remove(id),
            RegisterType::GameObject => self.gameobject.remove(id),
            RegisterType::GameObjectGossip => self.gameobject_gossip.remove(id),
            RegisterType::Spell => self.spell.remove(id),
            RegisterType::Item => self.item.remove(id),
            RegisterType::ItemGossip => self.item_gossip.remove(id),
            RegisterType::PlayerGossip => self.player_gossip.remove(id),
            RegisterType::Map => self.map.remove(id),
            RegisterType::Instance => self.instance.remove(id),
            RegisterType::CreatureUnique => self.creature_unique.remove(id),
        }
    }

    /// Drop every binding; used when the interpreter is torn down.
    pub fn clear_all(&self) {
        self.server.clear();
        self.player.clear();
        self.guild.clear();
        self.group.clear();
        self.vehicle.clear();
        self.bg.clear();
        self.packet.clear();
        self.creature.clear();
        self.creature_gossip.clear();
        self.gameobject.clear();
        self.gameobject_gossip.clear();
        self.spell.clear();
        self.item.clear();
        self.item_gossip.clear();
        self.player_gossip.clear();
        self.map.clear();
        self.instance.clear();
        self.creature_unique.clear();
    }

    pub fn total(&self) -> usize {
        self.server.len()
            + self.player.len()
            + self.guild.len()
            + self.group.len()
            + self.vehicle.len()
            + self.bg.len()
            + self.packet.len()
            + self.creature.len()
            + self.creature_gossip.len()
            + self.gameobject.len()
            + self.gameobject_gossip.len()
            + self.spell.len()
            + self.item.len()
            + self.item_gossip.len()
            + self.player_gossip.len()
            + self.map.len()
            + self.instance.len()
            + self.creature_unique.len()
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new()
    }
}

//! The Entity-Component-Store
//!
//! Owns the id allocator, component columns, entity metadata, query
//! indices, interned strings, the RNG stream, the per-tick input table
//! and the system registry. Everything that must agree across
//! participants lives here; everything here is deterministic.
//!
//! Iteration discipline: live entities are kept in ordered sets, so every
//! query yields ascending id order. Query results are materialized at
//! call time - entities created mid-iteration are not visible to an
//! iterator already in progress, and destroyed entities are detectable
//! via [`Store::is_alive`].

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

use crate::core::fixed::Fixed;
use crate::core::guard::SimulationGuard;
use crate::core::hash::StateHasher;
use crate::core::rng::DeterministicRng;
use crate::error::{EngineError, EngineResult};
use crate::input::action::{ActionId, ActionKind, ActionRegistry, InputData};
use crate::input::ClientId;

use super::component::{Column, ComponentDef, EntityTypeDef, FieldDef, Value};
use super::entity::{EntityId, IdAllocator};
use super::interner::{StringInterner, DOMAIN_CLIENT_ID, INTERN_NONE};
use super::schedule::{Phase, SystemRegistry};
use super::snapshot::{EntityMeta, Snapshot};

/// Hard cap on `max_entities` (the snapshot format carries generation
/// counts as u16).
pub const MAX_STORE_ENTITIES: u32 = u16::MAX as u32;

/// Resolved (component, field) pair for repeated access without name
/// lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldRef {
    /// Component registration index.
    pub component: u16,
    /// Field declaration index.
    pub field: u16,
}

/// Builder returned by [`Store::define_entity`].
///
/// Component references and default overrides are validated when
/// `register` runs, so calls chain without intermediate results.
pub struct EntityTypeBuilder<'a> {
    store: &'a mut Store,
    name: String,
    parts: Vec<(String, Vec<(String, Value)>)>,
    sync_none: bool,
}

impl<'a> EntityTypeBuilder<'a> {
    /// Compose a component into the type, with per-field default
    /// overrides.
    pub fn with(mut self, component: &str, overrides: &[(&str, Value)]) -> Self {
        self.parts.push((
            component.to_string(),
            overrides
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        ));
        self
    }

    /// Mark the type client-local: excluded from snapshots and the state
    /// hash.
    pub fn sync_none(mut self) -> Self {
        self.sync_none = true;
        self
    }

    /// Validate and register the type, returning its stable index.
    pub fn register(self) -> EngineResult<u16> {
        let EntityTypeBuilder {
            store,
            name,
            parts,
            sync_none,
        } = self;
        store.register_entity_type(name, parts, sync_none)
    }
}

/// The world state of one participant.
pub struct Store {
    max_entities: usize,
    allocator: IdAllocator,

    components: Vec<ComponentDef>,
    component_names: BTreeMap<String, u16>,
    entity_types: Vec<EntityTypeDef>,
    type_names: BTreeMap<String, u16>,
    /// Column storage: `[component][field]`, each sized `max_entities`.
    columns: Vec<Vec<Column>>,

    // per-entity metadata, addressed by entity index
    entity_type_of: Vec<u16>,
    entity_client: Vec<i32>,
    alive: Vec<bool>,

    /// All live ids, ascending.
    live: BTreeSet<u32>,
    /// Live ids per entity type.
    type_index: Vec<BTreeSet<u32>>,
    /// Live ids per component.
    component_index: Vec<BTreeSet<u32>>,

    interner: StringInterner,
    actions: ActionRegistry,
    inputs: BTreeMap<ClientId, InputData>,
    systems: SystemRegistry,

    rng: DeterministicRng,
    frame: u32,
    snapshot_seq: u32,
}

impl Store {
    /// Create a store with room for `max_entities` simultaneous entities,
    /// seeding the RNG stream.
    pub fn new(max_entities: u32, seed: u64) -> EngineResult<Self> {
        if max_entities == 0 || max_entities > MAX_STORE_ENTITIES {
            return Err(EngineError::Programmer(format!(
                "max_entities must be in 1..={}, got {}",
                MAX_STORE_ENTITIES, max_entities
            )));
        }
        let n = max_entities as usize;
        Ok(Self {
            max_entities: n,
            allocator: IdAllocator::new(max_entities),
            components: Vec::new(),
            component_names: BTreeMap::new(),
            entity_types: Vec::new(),
            type_names: BTreeMap::new(),
            columns: Vec::new(),
            entity_type_of: vec![0; n],
            entity_client: vec![INTERN_NONE; n],
            alive: vec![false; n],
            live: BTreeSet::new(),
            type_index: Vec::new(),
            component_index: Vec::new(),
            interner: StringInterner::new(),
            actions: ActionRegistry::new(),
            inputs: BTreeMap::new(),
            systems: SystemRegistry::new(),
            rng: DeterministicRng::new(seed),
            frame: 0,
            snapshot_seq: 0,
        })
    }

    // =========================================================================
    // SCHEMA REGISTRATION
    // =========================================================================

    /// Register a component with its ordered fields. Registration order
    /// is stable and part of the serialization protocol.
    pub fn register_component(
        &mut self,
        name: &str,
        fields: Vec<FieldDef>,
    ) -> EngineResult<u16> {
        if !self.live.is_empty() {
            return Err(EngineError::Programmer(
                "components must be registered before entities exist".into(),
            ));
        }
        if self.component_names.contains_key(name) {
            return Err(EngineError::Programmer(format!(
                "component '{}' already registered",
                name
            )));
        }
        if fields.is_empty() {
            return Err(EngineError::Programmer(format!(
                "component '{}' declares no fields",
                name
            )));
        }
        let index = self.components.len() as u16;
        self.columns.push(
            fields
                .iter()
                .map(|f| Column::new(f.ty, self.max_entities))
                .collect(),
        );
        self.components.push(ComponentDef {
            name: name.to_string(),
            index,
            fields,
        });
        self.component_names.insert(name.to_string(), index);
        self.component_index.push(BTreeSet::new());
        Ok(index)
    }

    /// Begin defining an entity type.
    pub fn define_entity(&mut self, name: &str) -> EntityTypeBuilder<'_> {
        EntityTypeBuilder {
            name: name.to_string(),
            store: self,
            parts: Vec::new(),
            sync_none: false,
        }
    }

    fn register_entity_type(
        &mut self,
        name: String,
        parts: Vec<(String, Vec<(String, Value)>)>,
        sync_none: bool,
    ) -> EngineResult<u16> {
        if !self.live.is_empty() {
            return Err(EngineError::Programmer(
                "entity types must be registered before entities exist".into(),
            ));
        }
        if self.type_names.contains_key(&name) {
            return Err(EngineError::Programmer(format!(
                "entity type '{}' already registered",
                name
            )));
        }

        let mut components: Vec<u16> = Vec::with_capacity(parts.len());
        let mut overrides: BTreeMap<u16, Vec<(usize, Value)>> = BTreeMap::new();
        for (component_name, field_overrides) in &parts {
            let comp_idx = self.component_id(component_name)?;
            if components.contains(&comp_idx) {
                return Err(EngineError::Programmer(format!(
                    "entity type '{}' lists component '{}' twice",
                    name, component_name
                )));
            }
            components.push(comp_idx);
            let def = &self.components[comp_idx as usize];
            let mut resolved = Vec::with_capacity(field_overrides.len());
            for (field_name, value) in field_overrides {
                let field_idx = def.field_index(field_name).ok_or_else(|| {
                    EngineError::Programmer(format!(
                        "component '{}' has no field '{}'",
                        component_name, field_name
                    ))
                })?;
                if def.fields[field_idx].ty != value.scalar_type() {
                    return Err(EngineError::Programmer(format!(
                        "default for '{}.{}' has type {:?}, field is {:?}",
                        component_name,
                        field_name,
                        value.scalar_type(),
                        def.fields[field_idx].ty
                    )));
                }
                resolved.push((field_idx, *value));
            }
            overrides.insert(comp_idx, resolved);
        }
        components.sort_unstable();

        // resolve per-field defaults once, at definition time
        let defaults = components
            .iter()
            .map(|comp_idx| {
                let def = &self.components[*comp_idx as usize];
                let mut values: Vec<Value> =
                    def.fields.iter().map(|f| f.default).collect();
                if let Some(list) = overrides.get(comp_idx) {
                    for (field_idx, value) in list {
                        values[*field_idx] = *value;
                    }
                }
                values
            })
            .collect();

        let index = self.entity_types.len() as u16;
        self.entity_types.push(EntityTypeDef {
            name: name.clone(),
            index,
            components,
            defaults,
            sync_none,
        });
        self.type_names.insert(name, index);
        self.type_index.push(BTreeSet::new());
        Ok(index)
    }

    /// Registration index of a component.
    pub fn component_id(&self, name: &str) -> EngineResult<u16> {
        self.component_names.get(name).copied().ok_or_else(|| {
            EngineError::Programmer(format!("component '{}' not registered", name))
        })
    }

    /// Registration index of an entity type.
    pub fn entity_type_id(&self, name: &str) -> EngineResult<u16> {
        self.type_names.get(name).copied().ok_or_else(|| {
            EngineError::Programmer(format!("entity type '{}' not registered", name))
        })
    }

    /// The registration-ordered component schema (snapshot decoding needs
    /// it on the receiving side).
    pub fn component_schema(&self) -> &[ComponentDef] {
        &self.components
    }

    /// Declare an input action.
    pub fn register_action(&mut self, name: &str, kind: ActionKind) -> EngineResult<ActionId> {
        self.actions.register(name, kind)
    }

    /// Id of a declared action.
    pub fn action_id(&self, name: &str) -> EngineResult<ActionId> {
        self.actions.id(name).ok_or_else(|| {
            EngineError::Programmer(format!("action '{}' not registered", name))
        })
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    /// Spawn an entity of a registered type, optionally owned by a
    /// client. Columns of its components are set to the type's defaults.
    pub fn spawn(&mut self, type_name: &str, client: Option<&ClientId>) -> EngineResult<EntityId> {
        let type_idx = self.entity_type_id(type_name)?;
        let id = self.allocator.allocate()?;
        let idx = id.index() as usize;

        let interned_client = match client {
            Some(c) => self.interner.intern(DOMAIN_CLIENT_ID, c.as_str()) as i32,
            None => INTERN_NONE,
        };
        self.entity_type_of[idx] = type_idx;
        self.entity_client[idx] = interned_client;
        self.alive[idx] = true;
        self.live.insert(id.raw());
        self.type_index[type_idx as usize].insert(id.raw());

        let type_def = &self.entity_types[type_idx as usize];
        for (slot, comp_idx) in type_def.components.iter().enumerate() {
            self.component_index[*comp_idx as usize].insert(id.raw());
            let columns = &mut self.columns[*comp_idx as usize];
            for (field_idx, value) in type_def.defaults[slot].iter().enumerate() {
                columns[field_idx].set(idx, *value)?;
            }
        }

        trace!(entity = ?id, ty = type_name, "spawn");
        Ok(id)
    }

    /// Destroy an entity. Its id's generation is bumped so stale handles
    /// fail validation; its column slots are left untouched.
    pub fn despawn(&mut self, id: EntityId) -> EngineResult<()> {
        if !self.is_alive(id) {
            return Err(EngineError::Programmer(format!(
                "despawn of dead or stale {:?}",
                id
            )));
        }
        let idx = id.index() as usize;
        let type_idx = self.entity_type_of[idx] as usize;
        self.alive[idx] = false;
        self.entity_client[idx] = INTERN_NONE;
        self.live.remove(&id.raw());
        self.type_index[type_idx].remove(&id.raw());
        for comp_idx in &self.entity_types[type_idx].components {
            self.component_index[*comp_idx as usize].remove(&id.raw());
        }
        self.allocator.free(id)?;
        trace!(entity = ?id, "despawn");
        Ok(())
    }

    /// Whether an id refers to a live entity (generation-checked).
    pub fn is_alive(&self, id: EntityId) -> bool {
        let idx = id.index() as usize;
        idx < self.max_entities && self.alive[idx] && self.allocator.is_current(id)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.live.len()
    }

    /// Entity-type name of a live entity.
    pub fn type_of(&self, id: EntityId) -> EngineResult<&str> {
        if !self.is_alive(id) {
            return Err(EngineError::Programmer(format!("dead entity {:?}", id)));
        }
        Ok(&self.entity_types[self.entity_type_of[id.index() as usize] as usize].name)
    }

    /// Owning client of a live entity, if any.
    pub fn client_of(&self, id: EntityId) -> Option<ClientId> {
        if !self.is_alive(id) {
            return None;
        }
        let interned = self.entity_client[id.index() as usize];
        if interned == INTERN_NONE {
            return None;
        }
        self.interner
            .resolve(DOMAIN_CLIENT_ID, interned as u32)
            .map(ClientId::new)
    }

    /// All clients owning at least one live entity, ascending.
    ///
    /// This is the "Player-bearing entities" source of truth the session
    /// re-derives the active-client set from after a snapshot load.
    pub fn owning_clients(&self) -> BTreeSet<ClientId> {
        let mut out = BTreeSet::new();
        for raw in &self.live {
            let interned = self.entity_client[EntityId::from_raw(*raw).index() as usize];
            if interned != INTERN_NONE {
                if let Some(s) = self.interner.resolve(DOMAIN_CLIENT_ID, interned as u32) {
                    out.insert(ClientId::new(s));
                }
            }
        }
        out
    }

    // =========================================================================
    // QUERIES (ascending id order, materialized at call time)
    // =========================================================================

    /// All live entities.
    pub fn entities(&self) -> Vec<EntityId> {
        self.live.iter().map(|raw| EntityId::from_raw(*raw)).collect()
    }

    /// Live entities of a type.
    pub fn query_type(&self, type_name: &str) -> EngineResult<Vec<EntityId>> {
        let idx = self.entity_type_id(type_name)?;
        Ok(self.type_index[idx as usize]
            .iter()
            .map(|raw| EntityId::from_raw(*raw))
            .collect())
    }

    /// Live entities carrying a component.
    pub fn query_component(&self, component: &str) -> EngineResult<Vec<EntityId>> {
        let idx = self.component_id(component)?;
        Ok(self.component_index[idx as usize]
            .iter()
            .map(|raw| EntityId::from_raw(*raw))
            .collect())
    }

    /// Allocation-free variant of [`query_type`](Self::query_type) for
    /// hot-path systems: clears and refills `buf`.
    pub fn query_type_into(&self, type_name: &str, buf: &mut Vec<EntityId>) -> EngineResult<()> {
        let idx = self.entity_type_id(type_name)?;
        buf.clear();
        buf.extend(
            self.type_index[idx as usize]
                .iter()
                .map(|raw| EntityId::from_raw(*raw)),
        );
        Ok(())
    }

    // =========================================================================
    // FIELD ACCESS
    // =========================================================================

    /// Resolve a (component, field) pair once for repeated access.
    pub fn field_ref(&self, component: &str, field: &str) -> EngineResult<FieldRef> {
        let comp_idx = self.component_id(component)?;
        let def = &self.components[comp_idx as usize];
        let field_idx = def.field_index(field).ok_or_else(|| {
            EngineError::Programmer(format!(
                "component '{}' has no field '{}'",
                component, field
            ))
        })?;
        Ok(FieldRef {
            component: comp_idx,
            field: field_idx as u16,
        })
    }

    fn check_access(&self, fr: FieldRef, id: EntityId) -> EngineResult<usize> {
        if !self.is_alive(id) {
            return Err(EngineError::Programmer(format!(
                "field access on dead {:?}",
                id
            )));
        }
        let idx = id.index() as usize;
        let type_def = &self.entity_types[self.entity_type_of[idx] as usize];
        if !type_def.has_component(fr.component) {
            return Err(EngineError::Programmer(format!(
                "entity type '{}' has no component '{}'",
                type_def.name, self.components[fr.component as usize].name
            )));
        }
        Ok(idx)
    }

    /// Read a field value.
    pub fn read_value(&self, fr: FieldRef, id: EntityId) -> EngineResult<Value> {
        let idx = self.check_access(fr, id)?;
        Ok(self.columns[fr.component as usize][fr.field as usize].get(idx))
    }

    /// Write a field value (type-checked against the column).
    pub fn write_value(&mut self, fr: FieldRef, id: EntityId, value: Value) -> EngineResult<()> {
        let idx = self.check_access(fr, id)?;
        self.columns[fr.component as usize][fr.field as usize].set(idx, value)
    }

    /// Read a fixed-point field (simulation fast path).
    pub fn read_fixed(&self, fr: FieldRef, id: EntityId) -> EngineResult<Fixed> {
        let idx = self.check_access(fr, id)?;
        self.columns[fr.component as usize][fr.field as usize].get_i32(idx)
    }

    /// Write a fixed-point field (simulation fast path).
    pub fn write_fixed(&mut self, fr: FieldRef, id: EntityId, value: Fixed) -> EngineResult<()> {
        let idx = self.check_access(fr, id)?;
        self.columns[fr.component as usize][fr.field as usize].set_i32(idx, value)
    }

    /// Name-resolved read; prefer [`field_ref`](Self::field_ref) +
    /// [`read_value`](Self::read_value) in loops.
    pub fn get(&self, id: EntityId, component: &str, field: &str) -> EngineResult<Value> {
        self.read_value(self.field_ref(component, field)?, id)
    }

    /// Name-resolved write.
    pub fn set(
        &mut self,
        id: EntityId,
        component: &str,
        field: &str,
        value: Value,
    ) -> EngineResult<()> {
        self.write_value(self.field_ref(component, field)?, id, value)
    }

    // =========================================================================
    // STRINGS, RNG, INPUTS
    // =========================================================================

    /// Intern a string in a domain, returning its stable small integer.
    pub fn intern(&mut self, domain: &str, value: &str) -> u32 {
        self.interner.intern(domain, value)
    }

    /// Resolve an interned id back to its string.
    pub fn resolve_interned(&self, domain: &str, id: u32) -> Option<&str> {
        self.interner.resolve(domain, id)
    }

    /// The deterministic RNG stream (systems draw from here and nowhere
    /// else).
    pub fn rng_mut(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// Input data for a client this tick, if present.
    pub fn input(&self, client: &ClientId) -> Option<&InputData> {
        self.inputs.get(client)
    }

    /// This tick's inputs in ascending client-id order (the
    /// determinism-critical application order).
    pub fn inputs(&self) -> impl Iterator<Item = (&ClientId, &InputData)> {
        self.inputs.iter()
    }

    // =========================================================================
    // SYSTEMS AND TICK
    // =========================================================================

    /// Register a simulation system.
    pub fn register_system(
        &mut self,
        phase: Phase,
        name: impl Into<String>,
        run: impl FnMut(&mut Store) -> EngineResult<()> + 'static,
    ) {
        self.systems.register(phase, name, run);
    }

    /// Register a render system (read-only, driven by the render loop).
    pub fn register_render_system(
        &mut self,
        name: impl Into<String>,
        run: impl FnMut(&Store) + 'static,
    ) {
        self.systems.register_render(name, run);
    }

    /// Run one simulation tick: install the frame's inputs, then execute
    /// the five simulation phases in order, systems in registration order
    /// within each phase.
    ///
    /// On error the frame is aborted mid-phase and the error surfaces to
    /// the caller, which restores its pre-tick snapshot.
    pub fn tick(
        &mut self,
        frame: u32,
        inputs: BTreeMap<ClientId, InputData>,
    ) -> EngineResult<()> {
        let _guard = SimulationGuard::enter();
        self.frame = frame;
        self.inputs = inputs;

        let mut systems = std::mem::take(&mut self.systems);
        let mut result = Ok(());
        'phases: for phase in Phase::SIMULATION {
            let sim_index = match phase.sim_index() {
                Some(idx) => idx,
                None => continue,
            };
            for system in systems.phase_mut(sim_index) {
                if let Err(err) = (system.run)(self) {
                    debug!(frame, system = %system.name, error = %err, "tick aborted");
                    result = Err(err);
                    break 'phases;
                }
            }
        }
        self.systems = systems;
        result
    }

    /// Run the render systems (read-only pass, separate cadence).
    pub fn run_render(&mut self) {
        let mut systems = std::mem::take(&mut self.systems);
        for system in systems.render_mut() {
            (system.run)(self);
        }
        self.systems = systems;
    }

    /// Current frame.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    // =========================================================================
    // STATE HASH
    // =========================================================================

    /// 32-bit digest over the synchronized world state.
    ///
    /// Folds: frame, entity count, then per entity in ascending id order
    /// its id and every field of every component of its type, components
    /// in registration order, fields in declaration order. `sync_none`
    /// entities are excluded.
    pub fn state_hash(&self) -> u32 {
        let mut hasher = StateHasher::new(0);
        hasher.write_u32(self.frame);

        let synced: Vec<EntityId> = self
            .live
            .iter()
            .map(|raw| EntityId::from_raw(*raw))
            .filter(|id| !self.entity_types[self.entity_type_of[id.index() as usize] as usize].sync_none)
            .collect();
        hasher.write_u32(synced.len() as u32);

        for id in synced {
            hasher.write_u32(id.raw());
            let idx = id.index() as usize;
            let type_def = &self.entity_types[self.entity_type_of[idx] as usize];
            for comp_idx in &type_def.components {
                for column in &self.columns[*comp_idx as usize] {
                    hasher.write_u32(column.get(idx).bits());
                }
            }
        }
        hasher.finalize()
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Produce a snapshot of the synchronized state.
    ///
    /// `post_tick` records whether the caller took it after the tick for
    /// the current frame completed; receivers use it to decide the resume
    /// frame. `sync_none` entities are excluded.
    pub fn sparse_snapshot(&mut self, post_tick: bool) -> Snapshot {
        self.snapshot_seq += 1;

        let entities: Vec<EntityMeta> = self
            .live
            .iter()
            .map(|raw| EntityId::from_raw(*raw))
            .filter(|id| !self.entity_types[self.entity_type_of[id.index() as usize] as usize].sync_none)
            .map(|id| EntityMeta {
                id: id.raw(),
                type_idx: self.entity_type_of[id.index() as usize],
                client: self.entity_client[id.index() as usize],
            })
            .collect();

        let columns = self
            .components
            .iter()
            .map(|component| {
                let comp_idx = component.index;
                component
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(field_idx, field)| {
                        entities
                            .iter()
                            .map(|meta| {
                                let type_def = &self.entity_types[meta.type_idx as usize];
                                if type_def.has_component(comp_idx) {
                                    self.columns[comp_idx as usize][field_idx]
                                        .get(EntityId::from_raw(meta.id).index() as usize)
                                } else {
                                    Value::zero(field.ty)
                                }
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();

        Snapshot {
            frame: self.frame,
            seq: self.snapshot_seq,
            post_tick,
            entities,
            columns,
            string_tables: self.interner.export(),
            rng_state: self.rng.save_state(),
            allocator: self.allocator.save_state(),
        }
    }

    /// Replace all synchronized state with a snapshot's.
    ///
    /// After this call the live set is exactly the snapshot's entity set,
    /// every field is restored, the interner and RNG are reinstalled, and
    /// the next allocation returns the id the snapshot's source would
    /// have returned next.
    pub fn load_sparse_snapshot(&mut self, snapshot: &Snapshot) -> EngineResult<()> {
        if snapshot.columns.len() != self.components.len() {
            return Err(EngineError::Protocol(format!(
                "snapshot has {} components, store registered {}",
                snapshot.columns.len(),
                self.components.len()
            )));
        }

        // clear all current state
        self.live.clear();
        for set in &mut self.type_index {
            set.clear();
        }
        for set in &mut self.component_index {
            set.clear();
        }
        self.alive.fill(false);
        self.entity_client.fill(INTERN_NONE);

        self.interner.restore(snapshot.string_tables.clone());
        self.rng.load_state(snapshot.rng_state);
        self.allocator.load_state(snapshot.allocator.clone());
        self.frame = snapshot.frame;
        self.snapshot_seq = snapshot.seq;

        for (pos, meta) in snapshot.entities.iter().enumerate() {
            let id = EntityId::from_raw(meta.id);
            let idx = id.index() as usize;
            if idx >= self.max_entities {
                return Err(EngineError::Protocol(format!(
                    "snapshot entity {:?} outside capacity {}",
                    id, self.max_entities
                )));
            }
            let type_def = self
                .entity_types
                .get(meta.type_idx as usize)
                .ok_or_else(|| {
                    EngineError::Protocol(format!(
                        "snapshot references unregistered entity type {}",
                        meta.type_idx
                    ))
                })?;

            self.entity_type_of[idx] = meta.type_idx;
            self.entity_client[idx] = meta.client;
            self.alive[idx] = true;
            self.live.insert(meta.id);
            self.type_index[meta.type_idx as usize].insert(meta.id);

            let components = type_def.components.clone();
            for comp_idx in components {
                self.component_index[comp_idx as usize].insert(meta.id);
                let fields = &snapshot.columns[comp_idx as usize];
                for (field_idx, values) in fields.iter().enumerate() {
                    let value = values.get(pos).copied().ok_or_else(|| {
                        EngineError::Protocol("snapshot column shorter than entity list".into())
                    })?;
                    self.columns[comp_idx as usize][field_idx].set(idx, value)?;
                }
            }
        }

        debug!(
            frame = snapshot.frame,
            entities = snapshot.entities.len(),
            post_tick = snapshot.post_tick,
            "snapshot loaded"
        );
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

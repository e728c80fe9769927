//! Rollback correctness: a misprediction rewinds the store and
//! resimulation converges to the from-scratch timeline.

use std::collections::BTreeMap;

use quorum_engine::input::action::{ActionKind, ActionValue, InputData, InputPayload};
use quorum_engine::input::history::PredictionStrategy;
use quorum_engine::predict::{
    LifecycleEvent, LifecycleKind, PredictHooks, PredictionManager, RelayedInput,
};
use quorum_engine::store::Phase;
use quorum_engine::{to_fixed, ClientId, EngineResult, ErrorKind, FieldDef, Fixed, Store};

fn game_store() -> Store {
    let mut store = Store::new(128, 11).unwrap();
    store
        .register_component("Transform2D", vec![FieldDef::fixed("x", 0)])
        .unwrap();
    store
        .define_entity("cell")
        .with("Transform2D", &[])
        .register()
        .unwrap();
    store.register_action("mx", ActionKind::Scalar).unwrap();
    store.register_system(Phase::Update, "move", |store: &mut Store| {
        let fr = store.field_ref("Transform2D", "x")?;
        let mx = store.action_id("mx")?;
        let moves: Vec<_> = store
            .query_type("cell")?
            .into_iter()
            .filter_map(|id| {
                let owner = store.client_of(id)?;
                match store.input(&owner)?.get(mx) {
                    Some(ActionValue::Scalar(v)) => Some((id, v)),
                    _ => None,
                }
            })
            .collect();
        for (id, v) in moves {
            let x = store.read_fixed(fr, id)?;
            store.write_fixed(fr, id, x.wrapping_add(v))?;
        }
        Ok(())
    });
    store
}

fn mx(v: Fixed) -> InputData {
    let mut d = InputData::new();
    d.set(
        quorum_engine::ActionId(0),
        ActionValue::Scalar(v),
    );
    d
}

fn game(client: &str, v: Fixed) -> RelayedInput {
    RelayedInput {
        client: client.into(),
        payload: InputPayload::Game(mx(v)),
    }
}

fn join(client: &str) -> RelayedInput {
    RelayedInput {
        client: client.into(),
        payload: InputPayload::Join,
    }
}

struct Hooks;

impl PredictHooks for Hooks {
    fn lifecycle_apply(&mut self, store: &mut Store, event: &LifecycleEvent) -> EngineResult<()> {
        match event.kind {
            LifecycleKind::Join => {
                store.spawn("cell", Some(&event.client))?;
            }
            LifecycleKind::Leave => {
                for id in store.query_type("cell")? {
                    if store.client_of(id).as_ref() == Some(&event.client) {
                        store.despawn(id)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn lifecycle_undo(&mut self, _store: &mut Store, _event: &LifecycleEvent) {}
    fn lifecycle_deferred(&mut self, _event: &LifecycleEvent) {}
    fn frame_resimulated(&mut self, _store: &Store, _frame: u32) {}
}

fn manager(max_prediction: u32) -> PredictionManager {
    let mut m = PredictionManager::new(128, PredictionStrategy::Idle, 32, max_prediction, 0);
    m.set_enabled(true);
    m.set_resolver(Box::new(|raw| Some(ClientId::new(raw))));
    m
}

/// S2: three active clients, local input queued, peers predicted idle;
/// the confirmed tick for frame 1 carries a non-idle input for one peer.
/// After the rollback the store equals a from-scratch run fed the same
/// confirmed inputs for frames 1..3.
#[test]
fn s2_rollback_converges_to_confirmed_timeline() {
    let mut store = game_store();
    let mut m = manager(15);
    let mut hooks = Hooks;
    m.history_mut().set_local_client(ClientId::new("1"));

    m.receive_server_tick(&mut store, 0, &[join("1"), join("2"), join("3")], &mut hooks)
        .unwrap();
    m.queue_local_input(mx(to_fixed(10.0))).unwrap();
    for _ in 0..3 {
        m.advance_frame(&mut store, &mut hooks).unwrap();
    }
    assert_eq!(m.local_frame(), 3);

    let rolled = m
        .receive_server_tick(
            &mut store,
            1,
            &[game("1", to_fixed(10.0)), game("2", to_fixed(5.0))],
            &mut hooks,
        )
        .unwrap();
    assert!(rolled, "confirmed input for client 2 differed from idle");
    assert_eq!(m.local_frame(), 3);
    assert_eq!(store.frame(), 3);

    // from-scratch participant fed the same confirmed inputs
    let mut fresh = game_store();
    let ids: Vec<ClientId> = ["1", "2", "3"].iter().map(|s| ClientId::new(*s)).collect();
    for id in &ids {
        fresh.spawn("cell", Some(id)).unwrap();
    }
    for frame in 1..=3u32 {
        let mut inputs = BTreeMap::new();
        for id in &ids {
            let data = if frame == 1 {
                match id.as_str() {
                    "1" => mx(to_fixed(10.0)),
                    "2" => mx(to_fixed(5.0)),
                    _ => InputData::new(),
                }
            } else {
                InputData::new()
            };
            inputs.insert(id.clone(), data);
        }
        fresh.tick(frame, inputs).unwrap();
    }

    assert_eq!(store.state_hash(), fresh.state_hash());

    // spot-check the field level too
    let fr = store.field_ref("Transform2D", "x").unwrap();
    for id in store.query_type("cell").unwrap() {
        let expected = match store.client_of(id).unwrap().as_str() {
            "1" => to_fixed(10.0),
            "2" => to_fixed(5.0),
            _ => 0,
        };
        assert_eq!(store.read_fixed(fr, id).unwrap(), expected);
    }
}

/// P3 generalized: repeated corrections at varying depths always
/// converge to the from-scratch run of the confirmed script.
#[test]
fn p3_repeated_corrections_converge() {
    let mut store = game_store();
    let mut m = manager(32);
    let mut hooks = Hooks;
    m.history_mut().set_local_client(ClientId::new("1"));
    m.receive_server_tick(&mut store, 0, &[join("1"), join("2")], &mut hooks)
        .unwrap();

    // confirmed script for client 2: frame → value, delivered late and
    // out of prediction order
    let script: &[(u32, f64)] = &[(2, 1.0), (5, -2.0), (6, 3.0)];

    for _ in 0..8 {
        m.advance_frame(&mut store, &mut hooks).unwrap();
    }
    for (frame, value) in script {
        m.receive_server_tick(&mut store, *frame, &[game("2", to_fixed(*value))], &mut hooks)
            .unwrap();
    }
    assert_eq!(m.local_frame(), 8);

    let mut fresh = game_store();
    let one = ClientId::new("1");
    let two = ClientId::new("2");
    fresh.spawn("cell", Some(&one)).unwrap();
    fresh.spawn("cell", Some(&two)).unwrap();
    for frame in 1..=8u32 {
        let mut inputs = BTreeMap::new();
        inputs.insert(one.clone(), InputData::new());
        let data = script
            .iter()
            .find(|(f, _)| *f == frame)
            .map(|(_, v)| mx(to_fixed(*v)))
            .unwrap_or_default();
        inputs.insert(two.clone(), data);
        fresh.tick(frame, inputs).unwrap();
    }
    assert_eq!(store.state_hash(), fresh.state_hash());
    assert!(m.stats().rollback_count >= 3);
}

/// B3: with max_prediction_frames = M, the M+1-th unconfirmed advance is
/// a no-op, and confirmation re-opens the window.
#[test]
fn b3_prediction_throttle_bounds_speculation() {
    let mut store = game_store();
    let mut m = manager(4);
    let mut hooks = Hooks;
    m.history_mut().set_local_client(ClientId::new("1"));
    m.receive_server_tick(&mut store, 0, &[join("1")], &mut hooks)
        .unwrap();

    for _ in 0..4 {
        assert!(m.advance_frame(&mut store, &mut hooks).unwrap());
    }
    for _ in 0..3 {
        assert!(!m.advance_frame(&mut store, &mut hooks).unwrap());
    }
    assert_eq!(m.local_frame(), 4);
    assert_eq!(m.prediction_depth(), 4);

    // a confirmation re-opens exactly one frame of headroom
    m.receive_server_tick(&mut store, 1, &[game("1", 0)], &mut hooks)
        .unwrap();
    assert_eq!(m.prediction_depth(), 3);
    assert!(m.advance_frame(&mut store, &mut hooks).unwrap());
    assert!(!m.advance_frame(&mut store, &mut hooks).unwrap());
}

/// A rollback target that fell off the snapshot ring is unrecoverable:
/// the caller re-baselines from an authority snapshot instead.
#[test]
fn unrecoverable_rollback_recovers_via_initialize() {
    let mut store = game_store();
    let mut m = PredictionManager::new(128, PredictionStrategy::Idle, 4, 64, 0);
    m.set_enabled(true);
    m.set_resolver(Box::new(|raw| Some(ClientId::new(raw))));
    let mut hooks = Hooks;
    m.history_mut().set_local_client(ClientId::new("1"));
    m.receive_server_tick(&mut store, 0, &[join("1")], &mut hooks)
        .unwrap();

    for _ in 0..12 {
        m.advance_frame(&mut store, &mut hooks).unwrap();
    }
    let err = m.execute_rollback(&mut store, 2, &mut hooks).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    // authority snapshot stands in for the lost history
    let authority_snapshot = store.sparse_snapshot(true);
    let frame = authority_snapshot.frame;
    store.load_sparse_snapshot(&authority_snapshot).unwrap();
    m.initialize(&mut store, frame);
    assert_eq!(m.local_frame(), frame);
    assert_eq!(m.prediction_depth(), 0);
    assert!(m.advance_frame(&mut store, &mut hooks).unwrap());
}

//! Shared harness for the end-to-end scenarios: a small cell-eater game
//! (player cells moved by a "move" vector, food pellets seeded from the
//! shared RNG) plus relay/session pacing helpers.

use quorum_engine::core::fixed::{to_fixed, Fixed};
use quorum_engine::input::action::{ActionKind, ActionValue, InputData};
use quorum_engine::session::{Session, SessionCallbacks, SessionConfig};
use quorum_engine::store::Phase;
use quorum_engine::{ClientId, EngineResult, FieldDef, Store};

/// Food pellets placed when the room is created.
pub const INITIAL_FOOD: usize = 10;

/// Relay tick interval used by the scenarios. Long on purpose: the relay
/// clock is virtual while the sessions read a real clock, so a coarse
/// interval keeps wall-clock noise from ever inflating the catch-up
/// target mid-test.
pub const TICK_MS: i64 = 1000;

/// Build a participant with the shared cell game registered.
pub fn build_participant() -> Session {
    let mut session = Session::new(SessionConfig {
        tick_rate: 1,
        input_delay_frames: 0,
        seed: 7,
        ..SessionConfig::default()
    })
    .expect("valid config");

    session
        .register_component(
            "Transform2D",
            vec![FieldDef::fixed("x", 0), FieldDef::fixed("y", 0)],
        )
        .unwrap();
    session
        .define_entity("cell")
        .with("Transform2D", &[])
        .register()
        .unwrap();
    session
        .define_entity("food")
        .with("Transform2D", &[])
        .register()
        .unwrap();
    session.register_action("move", ActionKind::Vector).unwrap();

    session.register_system(Phase::Update, "movement", |store: &mut Store| {
        let x_fr = store.field_ref("Transform2D", "x")?;
        let y_fr = store.field_ref("Transform2D", "y")?;
        let mv = store.action_id("move")?;
        let moves: Vec<_> = store
            .query_type("cell")?
            .into_iter()
            .filter_map(|id| {
                let owner = store.client_of(id)?;
                match store.input(&owner)?.get(mv) {
                    Some(ActionValue::Vector { x, y }) => Some((id, x, y)),
                    _ => None,
                }
            })
            .collect();
        for (id, dx, dy) in moves {
            let x = store.read_fixed(x_fr, id)?;
            let y = store.read_fixed(y_fr, id)?;
            store.write_fixed(x_fr, id, x.wrapping_add(dx))?;
            store.write_fixed(y_fr, id, y.wrapping_add(dy))?;
        }
        Ok(())
    });

    session.register_system(Phase::Update, "food_spawner", |store: &mut Store| {
        spawn_food(store)?;
        Ok(())
    });

    session.init(
        SessionCallbacks::new()
            .on_room_create(|store: &mut Store| {
                for _ in 0..INITIAL_FOOD {
                    spawn_food(store)?;
                }
                Ok(())
            })
            .on_connect(|store: &mut Store, client: &ClientId| {
                store.spawn("cell", Some(client))?;
                Ok(())
            })
            .on_disconnect(|store: &mut Store, client: &ClientId| {
                for id in store.query_type("cell")? {
                    if store.client_of(id).as_ref() == Some(client) {
                        store.despawn(id)?;
                    }
                }
                Ok(())
            }),
    );
    session
}

fn spawn_food(store: &mut Store) -> EngineResult<()> {
    let x = store.rng_mut().d_random_range(to_fixed(-30.0), to_fixed(30.0));
    let y = store.rng_mut().d_random_range(to_fixed(-30.0), to_fixed(30.0));
    let food = store.spawn("food", None)?;
    let x_fr = store.field_ref("Transform2D", "x")?;
    let y_fr = store.field_ref("Transform2D", "y")?;
    store.write_fixed(x_fr, food, x)?;
    store.write_fixed(y_fr, food, y)?;
    Ok(())
}

/// A "move" input with the given components.
pub fn move_input(session: &Session, x: Fixed, y: Fixed) -> InputData {
    let mv = session.store().action_id("move").unwrap();
    let mut data = InputData::new();
    data.set(mv, ActionValue::Vector { x, y });
    data
}

/// The x position of the cell owned by `client`, if any.
pub fn cell_x(session: &Session, client: &str) -> Option<Fixed> {
    let store = session.store();
    let owner = ClientId::new(client);
    let cells = store.query_type("cell").unwrap();
    let id = cells
        .into_iter()
        .find(|id| store.client_of(*id).as_ref() == Some(&owner))?;
    let fr = store.field_ref("Transform2D", "x").unwrap();
    Some(store.read_fixed(fr, id).unwrap())
}

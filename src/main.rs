//! Quorum Engine Demo
//!
//! Runs a small cell-eater world in local mode with scripted inputs,
//! prints the resulting state hash, then replays the same script on a
//! fresh session and verifies the hashes agree.

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use quorum_engine::core::fixed::{fixed_mul, to_float};
use quorum_engine::input::action::{ActionKind, ActionValue, InputData};
use quorum_engine::session::{Session, SessionCallbacks, SessionConfig};
use quorum_engine::store::component::Value;
use quorum_engine::store::Phase;
use quorum_engine::{to_fixed, ClientId, EngineResult, FieldDef, Store, FIXED_ONE, VERSION};

/// Ticks the demo simulates.
const DEMO_TICKS: u32 = 200;

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Quorum Engine demo v{}", VERSION);

    let hash_a = run_scripted("local-demo")?;
    info!("first run state hash:  {}", hex::encode(hash_a.to_be_bytes()));

    let hash_b = run_scripted("local-demo")?;
    info!("replay state hash:     {}", hex::encode(hash_b.to_be_bytes()));

    if hash_a == hash_b {
        info!("DETERMINISM VERIFIED: hashes match");
        Ok(())
    } else {
        anyhow::bail!("determinism failure: {:08x} != {:08x}", hash_a, hash_b);
    }
}

/// Build the demo world, run the scripted match, return the final hash.
fn run_scripted(local_id: &str) -> Result<u32> {
    let mut session = build_session()?;
    // a fixed local id keeps the replay bit-identical
    session.set_client_id(ClientId::new(local_id))?;
    session.init(callbacks());
    session.start()?;

    let mv = session.store().action_id("move")?;
    for step in 0..DEMO_TICKS {
        // scripted joystick: circle-ish sweep, deterministic in `step`
        let angle = to_fixed(f64::from(step) * 0.05);
        let mut data = InputData::new();
        data.set(
            mv,
            ActionValue::Vector {
                x: quorum_engine::core::fixed::fixed_cos(angle),
                y: quorum_engine::core::fixed::fixed_sin(angle),
            },
        );
        session.queue_input(data)?;
        session.update()?;

        if step % 50 == 0 {
            let food = session.store().query_type("food")?.len();
            info!(
                frame = session.frame(),
                food,
                hash = format_args!("{:08x}", session.get_state_hash()),
                "progress"
            );
        }
    }

    let cells = session.store().query_type("cell")?;
    if let Some(cell) = cells.first() {
        let x = session.store().get(*cell, "Transform2D", "x")?;
        let y = session.store().get(*cell, "Transform2D", "y")?;
        if let (Value::I32(x), Value::I32(y)) = (x, y) {
            info!("player cell at ({:.3}, {:.3})", to_float(x), to_float(y));
        }
    }

    let hash = session.get_state_hash();
    session.stop();
    Ok(hash)
}

fn build_session() -> Result<Session> {
    let mut session = Session::new(SessionConfig {
        seed: 20260801,
        ..SessionConfig::default()
    })?;

    session.register_component(
        "Transform2D",
        vec![FieldDef::fixed("x", 0), FieldDef::fixed("y", 0)],
    )?;
    session.register_component(
        "Cell",
        vec![
            FieldDef::fixed("speed", to_fixed(4.0)),
            // eat cooldown lives in the component so it snapshots
            FieldDef::new("cooldown", Value::U16(0)),
        ],
    )?;
    session
        .define_entity("cell")
        .with("Transform2D", &[])
        .with("Cell", &[])
        .register()?;
    session
        .define_entity("food")
        .with("Transform2D", &[])
        .register()?;

    session.register_action("move", ActionKind::Vector)?;

    session.register_system(Phase::Update, "movement", movement_system);
    session.register_system(Phase::Update, "food_spawner", food_spawner);
    session.register_system(Phase::PostPhysics, "eating", eating_system);

    Ok(session)
}

fn callbacks() -> SessionCallbacks {
    SessionCallbacks::new()
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
        })
}

/// Move each cell by its owner's joystick, scaled by speed per tick.
fn movement_system(store: &mut Store) -> EngineResult<()> {
    let x_fr = store.field_ref("Transform2D", "x")?;
    let y_fr = store.field_ref("Transform2D", "y")?;
    let speed_fr = store.field_ref("Cell", "speed")?;
    let mv = store.action_id("move")?;

    // one tick worth of travel at speed 1.0 (20 Hz)
    let dt = FIXED_ONE / 20;

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
        let speed = store.read_fixed(speed_fr, id)?;
        let step = fixed_mul(speed, dt);
        let x = store.read_fixed(x_fr, id)?;
        let y = store.read_fixed(y_fr, id)?;
        store.write_fixed(x_fr, id, x.wrapping_add(fixed_mul(dx, step)))?;
        store.write_fixed(y_fr, id, y.wrapping_add(fixed_mul(dy, step)))?;
    }
    Ok(())
}

/// Every 10 ticks drop a food pellet at a seeded random position.
fn food_spawner(store: &mut Store) -> EngineResult<()> {
    if store.frame() % 10 != 0 {
        return Ok(());
    }
    let x = store.rng_mut().d_random_range(to_fixed(-30.0), to_fixed(30.0));
    let y = store.rng_mut().d_random_range(to_fixed(-30.0), to_fixed(30.0));
    let food = store.spawn("food", None)?;
    let x_fr = store.field_ref("Transform2D", "x")?;
    let y_fr = store.field_ref("Transform2D", "y")?;
    store.write_fixed(x_fr, food, x)?;
    store.write_fixed(y_fr, food, y)?;
    Ok(())
}

/// Cells consume food within one unit; a short cooldown between bites.
fn eating_system(store: &mut Store) -> EngineResult<()> {
    let x_fr = store.field_ref("Transform2D", "x")?;
    let y_fr = store.field_ref("Transform2D", "y")?;
    let cd_fr = store.field_ref("Cell", "cooldown")?;
    let eat_radius_sq = FIXED_ONE; // 1.0^2

    let cells = store.query_type("cell")?;
    let foods = store.query_type("food")?;

    for cell in cells {
        if !store.is_alive(cell) {
            continue;
        }
        if let Value::U16(cd) = store.read_value(cd_fr, cell)? {
            if cd > 0 {
                store.write_value(cd_fr, cell, Value::U16(cd - 1))?;
                continue;
            }
        }
        let cx = store.read_fixed(x_fr, cell)?;
        let cy = store.read_fixed(y_fr, cell)?;
        for food in &foods {
            if !store.is_alive(*food) {
                continue;
            }
            let dx = store.read_fixed(x_fr, *food)?.wrapping_sub(cx);
            let dy = store.read_fixed(y_fr, *food)?.wrapping_sub(cy);
            let dist_sq = fixed_mul(dx, dx).wrapping_add(fixed_mul(dy, dy));
            if dist_sq <= eat_radius_sq {
                store.despawn(*food)?;
                store.write_value(cd_fr, cell, Value::U16(5))?;
                break;
            }
        }
    }
    Ok(())
}

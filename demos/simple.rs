use archecs::*;

struct Position(f32, f32);
struct Velocity(f32, f32);

struct MoveSystem {
    position: ComponentTypeId,
    velocity: ComponentTypeId,
    query: QueryId,
}

impl System for MoveSystem {
    fn on_update(&mut self, state: &mut SystemState) {
        let position = self.position;
        let velocity = self.velocity;
        let dt = state.dt;
        job::execute_job(state.entity_manager, self.query, state.global_version, |chunk, archetype| {
            let velocities = chunk.read::<Velocity>(archetype, velocity).unwrap();
            let positions = chunk.write::<Position>(archetype, position).unwrap();
            for (p, v) in positions.iter_mut().zip(velocities.iter()) {
                p.0 += v.0 * dt;
                p.1 += v.1 * dt;
            }
        });
    }
}

fn main() {
    init_logger();

    let mut world = World::new(vec![
        entity_type_info(),
        TypeInfo::of::<Position>(1, "Position"),
        TypeInfo::of::<Velocity>(2, "Velocity"),
    ])
    .expect("type registry misconfigured");

    let position = ComponentTypeId(1);
    let velocity = ComponentTypeId(2);

    let archetype = world.create_archetype(vec![position, velocity]);
    let entity = world.create_entity(archetype);
    log::info!("spawned {:?} in archetype {:?}", entity, archetype);

    let query = world.create_query(vec![QueryTerm::write(position), QueryTerm::read(velocity)]);

    world.register(Box::new(MoveSystem { position, velocity, query }));
    world.update(1.0);
    world.destroy();
}

fn init_logger() {
    let _ = env_logger::try_init();
}

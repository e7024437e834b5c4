use archecs::*;

struct Foo(u32);

fn main() {
    init_logger();

    let mut world = World::new(vec![entity_type_info(), TypeInfo::of::<Foo>(1, "Foo")])
        .expect("type registry misconfigured");

    let archetype = world.create_archetype(vec![ComponentTypeId(1)]);
    let mut entities = vec![Entity { index: -1, version: 0 }; 100_000];
    world.create_entities(archetype, &mut entities);

    let query = world.create_query(vec![QueryTerm::read(ComponentTypeId(1))]);
    let mut count = 0usize;
    world.run_query(query, |chunk, _archetype| count += chunk.len());
    log::info!("counted - {}", count);
}

fn init_logger() {
    let _ = env_logger::try_init();
}

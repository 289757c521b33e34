use memomap::{
    DbError, DynRecord, EntityModel, EntryState, MapOptions, Mapper, MapperConfiguration, MemorySession,
    MemorySet, PersistExt, Persistence, Record, TrackedCollection, Value, record_struct,
};

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Thing {
        pub id: i64,
        pub title: String,
    }
}

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    #[allow(non_snake_case)]
    pub struct ThingDto {
        pub ID: i64,
        pub Title: String,
    }
}

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct OrderLine {
        pub order_no: String,
        pub line_no: i32,
        pub quantity: i64,
    }
}

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct OrderLineMessage {
        pub order: String,
        pub line: i64,
        pub qty: i64,
    }
}

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Customer {
        pub id: i64,
        pub email: String,
        pub name: String,
    }
}

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct CustomerImport {
        pub email: String,
        pub name: String,
    }
}

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Gauge {
        pub id: i64,
        pub title: String,
        pub reading: f64,
        pub count: i32,
    }
}

record_struct! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct GaugeDto {
        pub id: i64,
        pub title: String,
        pub reading: f64,
        pub count: i64,
    }
}

fn thing_model() -> EntityModel {
    EntityModel::new().with_entity::<Thing>(&["id"]).unwrap()
}

fn thing_mapper(model: &EntityModel) -> Mapper {
    MapperConfiguration::builder()
        .create_map::<ThingDto, Thing>()
        .use_entity_model(model.clone())
        .build()
        .unwrap()
}

fn dto(id: i64, title: &str) -> ThingDto {
    ThingDto {
        ID: id,
        Title: title.to_string(),
    }
}

/// Session holding the saved rows {1,"A"}, {2,"B"}, {3,"C"}.
fn seeded() -> (MemorySession, Persistence<Thing, MemorySet<Thing>>) {
    let model = thing_model();
    let session = MemorySession::new(model.clone());
    let things = session.set::<Thing>().unwrap();
    for title in ["A", "B", "C"] {
        things
            .add(Thing {
                id: 0,
                title: title.to_string(),
            })
            .unwrap();
    }
    session.save_changes().unwrap();

    let persistence = things.persist(thing_mapper(&model)).unwrap();
    (session, persistence)
}

#[test]
fn test_insert_or_update_updates_the_matching_entity() {
    let (session, things) = seeded();

    let updated = things.insert_or_update(&dto(1, "X")).unwrap();

    assert_eq!(updated.read().unwrap().id, 1);
    assert_eq!(updated.read().unwrap().title, "X");
    assert_eq!(session.entry_state(&updated).unwrap(), EntryState::Modified);
    assert_eq!(session.count_in_state::<Thing>(EntryState::Added).unwrap(), 0);
    assert_eq!(things.collection().count().unwrap(), 3);
}

#[test]
fn test_insert_or_update_with_default_identity_inserts() {
    let (session, things) = seeded();

    let created = things.insert_or_update(&dto(0, "New")).unwrap();
    assert_eq!(created.read().unwrap().title, "New");
    assert_eq!(session.entry_state(&created).unwrap(), EntryState::Added);
    assert_eq!(session.count_in_state::<Thing>(EntryState::Added).unwrap(), 1);

    assert_eq!(session.save_changes().unwrap(), 1);
    assert_eq!(things.collection().count().unwrap(), 4);
    assert_eq!(created.read().unwrap().id, 4);
}

#[test]
fn test_insert_or_update_with_unknown_identity_inserts() {
    let (session, things) = seeded();

    let created = things.insert_or_update(&dto(42, "Explicit")).unwrap();
    assert_eq!(session.entry_state(&created).unwrap(), EntryState::Added);

    session.save_changes().unwrap();
    assert_eq!(created.read().unwrap().id, 42);
    assert_eq!(things.collection().count().unwrap(), 4);
}

#[test]
fn test_insert_or_update_with_same_values_leaves_entity_unchanged() {
    let (session, things) = seeded();

    let same = things.insert_or_update(&dto(2, "B")).unwrap();

    assert_eq!(session.entry_state(&same).unwrap(), EntryState::Unchanged);
    assert!(!session.has_changes().unwrap());
}

#[test]
fn test_repeated_update_resolves_to_one_entity() {
    let (session, things) = seeded();

    let first = things.insert_or_update(&dto(3, "Again")).unwrap();
    session.save_changes().unwrap();
    let second = things.insert_or_update(&dto(3, "Again")).unwrap();

    assert!(first.same_entity(&second));
    assert_eq!(session.entry_state(&second).unwrap(), EntryState::Unchanged);
    session.save_changes().unwrap();
    assert_eq!(things.collection().count().unwrap(), 3);
}

#[test]
fn test_remove_marks_the_matching_entity_deleted() {
    let (session, things) = seeded();

    assert!(things.remove(&dto(2, "ignored")).unwrap());
    assert_eq!(session.count_in_state::<Thing>(EntryState::Deleted).unwrap(), 1);
    assert_eq!(session.count_in_state::<Thing>(EntryState::Unchanged).unwrap(), 2);

    session.save_changes().unwrap();
    assert_eq!(things.collection().count().unwrap(), 2);
}

#[test]
fn test_remove_with_default_identity_is_a_no_op() {
    let (session, things) = seeded();

    assert!(!things.remove(&dto(0, "ignored")).unwrap());
    assert!(!session.has_changes().unwrap());

    session.save_changes().unwrap();
    assert_eq!(things.collection().count().unwrap(), 3);
}

#[test]
fn test_remove_when_absent_is_a_no_op() {
    let (session, things) = seeded();

    assert!(!things.remove(&dto(99, "missing")).unwrap());
    assert_eq!(session.count_in_state::<Thing>(EntryState::Unchanged).unwrap(), 3);
}

#[test]
fn test_pending_inserts_are_not_matched_before_save() {
    let (session, things) = seeded();

    things.insert_or_update(&dto(7, "first")).unwrap();
    things.insert_or_update(&dto(7, "second")).unwrap();

    assert_eq!(session.count_in_state::<Thing>(EntryState::Added).unwrap(), 2);
    let err = session.save_changes().unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
}

#[test]
fn test_weak_overloads_share_the_typed_behaviour() {
    let (session, things) = seeded();
    let source = dto(1, "Weak");

    let updated = things
        .insert_or_update_dyn(ThingDto::record_type_of(), &source)
        .unwrap();
    assert_eq!(updated.read().unwrap().title, "Weak");
    assert_eq!(session.entry_state(&updated).unwrap(), EntryState::Modified);

    let boxed: Box<dyn DynRecord> = Box::new(dto(3, ""));
    assert!(
        things
            .remove_dyn(boxed.record_type(), boxed.as_ref())
            .unwrap()
    );

    let wrong = things.insert_or_update_dyn(Thing::record_type_of(), &source);
    assert!(matches!(wrong, Err(DbError::TypeMismatch(_))));
}

#[test]
fn test_map_options_apply_to_inserts_and_updates() {
    let (_session, things) = seeded();
    let keep_title = MapOptions::new().ignore_member("title");

    let updated = things
        .insert_or_update_with(&dto(1, "should not land"), &keep_title)
        .unwrap();
    assert_eq!(updated.read().unwrap().title, "A");

    let stamped = MapOptions::new().after_map(|_, destination| {
        let _ = destination.set_field("title", Value::Text("stamped".into()));
    });
    let created = things.insert_or_update_with(&dto(0, "raw"), &stamped).unwrap();
    assert_eq!(created.read().unwrap().title, "stamped");
}

#[test]
fn test_composite_identity_routes_by_every_key_member() {
    let model = EntityModel::new()
        .with_entity::<OrderLine>(&["order_no", "line_no"])
        .unwrap();
    let mapper = MapperConfiguration::builder()
        .create_map_with::<OrderLineMessage, OrderLine>(|map| {
            map.for_member("order_no", "order")
                .for_member("line_no", "line")
                .for_member("quantity", "qty")
        })
        .use_entity_model(model.clone())
        .build()
        .unwrap();
    let session = MemorySession::new(model);
    let lines = session.set::<OrderLine>().unwrap().persist(mapper).unwrap();

    let message = |line: i64, qty: i64| OrderLineMessage {
        order: "SO-1".to_string(),
        line,
        qty,
    };
    lines.insert_or_update(&message(1, 5)).unwrap();
    lines.insert_or_update(&message(2, 1)).unwrap();
    assert_eq!(session.save_changes().unwrap(), 2);

    let updated = lines.insert_or_update(&message(2, 3)).unwrap();
    assert_eq!(updated.read().unwrap().quantity, 3);
    assert_eq!(updated.read().unwrap().line_no, 2);
    assert_eq!(session.count_in_state::<OrderLine>(EntryState::Modified).unwrap(), 1);

    let other_order = OrderLineMessage {
        order: "SO-2".to_string(),
        line: 2,
        qty: 3,
    };
    assert!(!lines.remove(&other_order).unwrap());
}

#[test]
fn test_explicit_equivalency_matches_on_natural_key() {
    let model = EntityModel::new().with_entity::<Customer>(&["id"]).unwrap();
    let mapper = MapperConfiguration::builder()
        .create_map_with::<CustomerImport, Customer>(|map| {
            map.ignore("id").equivalent_by(&[("email", "email")])
        })
        .use_entity_model(model.clone())
        .build()
        .unwrap();
    let session = MemorySession::new(model);
    let customers = session.set::<Customer>().unwrap().persist(mapper).unwrap();

    let import = |email: &str, name: &str| CustomerImport {
        email: email.to_string(),
        name: name.to_string(),
    };
    let created = customers.insert_or_update(&import("ann@example.com", "Ann")).unwrap();
    session.save_changes().unwrap();
    assert_eq!(created.read().unwrap().id, 1);

    let renamed = customers
        .insert_or_update(&import("ann@example.com", "Ann Lee"))
        .unwrap();
    assert!(renamed.same_entity(&created));
    assert_eq!(renamed.read().unwrap().name, "Ann Lee");
    assert_eq!(renamed.read().unwrap().id, 1);
}

#[test]
fn test_configuration_errors_surface_to_the_caller() {
    let model = thing_model();
    let session = MemorySession::new(model.clone());

    let unmapped = MapperConfiguration::builder().build().unwrap();
    let err = session.set::<Thing>().unwrap().persist(unmapped).unwrap_err();
    assert!(matches!(err, DbError::MappingNotFound(_, _)));

    let without_identity = MapperConfiguration::builder()
        .create_map::<ThingDto, Thing>()
        .build()
        .unwrap();
    let things = session.set::<Thing>().unwrap().persist(without_identity).unwrap();
    let err = things.insert_or_update(&dto(1, "X")).unwrap_err();
    assert!(matches!(err, DbError::EquivalencyNotConfigured(_, _)));
    assert!(err.is_configuration_error());

    let err = things.insert_or_update(&Customer::default()).unwrap_err();
    assert!(matches!(err, DbError::MappingNotFound(_, _)));
    assert!(!session.has_changes().unwrap());
}

fn seeded_gauges() -> (MemorySession, Persistence<Gauge, MemorySet<Gauge>>) {
    let model = EntityModel::new().with_entity::<Gauge>(&["id"]).unwrap();
    let mapper = MapperConfiguration::builder()
        .create_map::<GaugeDto, Gauge>()
        .use_entity_model(model.clone())
        .build()
        .unwrap();
    let session = MemorySession::new(model);
    let gauges = session.set::<Gauge>().unwrap();
    gauges
        .add(Gauge {
            id: 0,
            title: "boiler".to_string(),
            reading: 0.0,
            count: 1,
        })
        .unwrap();
    session.save_changes().unwrap();
    (session, gauges.persist(mapper).unwrap())
}

#[test]
fn test_tiny_float_change_is_written_and_tracked() {
    let (session, gauges) = seeded_gauges();

    let updated = gauges
        .insert_or_update(&GaugeDto {
            id: 1,
            title: "boiler".to_string(),
            reading: 1e-17,
            count: 1,
        })
        .unwrap();

    assert_eq!(updated.read().unwrap().reading, 1e-17);
    assert_eq!(session.entry_state(&updated).unwrap(), EntryState::Modified);

    session.save_changes().unwrap();
    let same = gauges
        .insert_or_update(&GaugeDto {
            id: 1,
            title: "boiler".to_string(),
            reading: 1e-17,
            count: 1,
        })
        .unwrap();
    assert_eq!(session.entry_state(&same).unwrap(), EntryState::Unchanged);
}

#[test]
fn test_failed_merge_leaves_entity_untouched() {
    let (session, gauges) = seeded_gauges();

    let err = gauges
        .insert_or_update(&GaugeDto {
            id: 1,
            title: "X".to_string(),
            reading: 2.5,
            count: 1 << 40,
        })
        .unwrap_err();
    assert!(matches!(err, DbError::TypeMismatch(_)));

    let stored = gauges.collection().stored().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(
        *stored[0].read().unwrap(),
        Gauge {
            id: 1,
            title: "boiler".to_string(),
            reading: 0.0,
            count: 1,
        }
    );
    assert_eq!(session.entry_state(&stored[0]).unwrap(), EntryState::Unchanged);
    assert!(!session.has_changes().unwrap());
}

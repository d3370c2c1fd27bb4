mod common;

use assert_matches::assert_matches;
use netabase_relations::prelude::*;

use common::{add_interface, device, group, location, relations};

fn device_class<B: RelationBackend>(r: &Relations<B>, id: &str) -> Entity {
    r.create_root(Entity::root("DeviceClass", format!("/Classes/{}", id)))
        .unwrap()
}

#[test]
fn containment_events_fire_around_add_and_remove() {
    let recorder = EventRecorder::new();
    let r = Relations::new(common::network_schema(), MemoryStore::new()).with_observer(recorder.clone());
    let a = device(&r, "a");
    let eth0 = add_interface(&r, &a, "eth0");

    r.to_many_cont(&a, "interfaces")
        .unwrap()
        .remove_relation(Some(&eth0), false)
        .unwrap();

    let events: Vec<ContainmentEvent> = recorder.events().iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![
            ContainmentEvent::WillBeAdded,
            ContainmentEvent::Added,
            ContainmentEvent::WillBeRemoved,
            ContainmentEvent::Removed,
        ]
    );
    assert!(recorder.events().iter().all(|e| e.object == eth0.primary_id));
    assert_eq!(recorder.events()[0].relation, RelationKey::new("/Devices/a", "interfaces"));
}

#[test]
fn suppressed_removal_is_silent() {
    let recorder = EventRecorder::new();
    let r = Relations::new(common::network_schema(), MemoryStore::new()).with_observer(recorder.clone());
    let a = device(&r, "a");
    add_interface(&r, &a, "eth0");
    recorder.clear();

    r.to_many_cont(&a, "interfaces")
        .unwrap()
        .remove_relation(None, true)
        .unwrap();
    assert!(recorder.events().is_empty());
}

#[test]
fn delete_contained_entity_goes_through_container() {
    let recorder = EventRecorder::new();
    let r = Relations::new(common::network_schema(), MemoryStore::new()).with_observer(recorder.clone());
    let a = device(&r, "a");
    let eth0 = add_interface(&r, &a, "eth0");
    recorder.clear();

    r.delete_entity(&eth0).unwrap();

    assert!(r.to_many_cont(&a, "interfaces").unwrap().object_values_all().unwrap().is_empty());
    assert_eq!(recorder.events().len(), 2);
    assert!(r.diagnose(&a).unwrap().is_clean());
}

#[test]
fn delete_root_removes_links_on_the_other_side() {
    let r = relations(MemoryStore::new());
    let a = device(&r, "a");
    let g = group(&r, "core");
    let dc1 = location(&r, "dc1");
    add_interface(&r, &a, "eth0");
    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();
    r.to_one(&a, "location").unwrap().add_relation(&dc1).unwrap();

    r.delete_entity(&a).unwrap();

    assert_eq!(r.backend().entity_count(), 2);
    assert!(r.to_many(&g, "devices").unwrap().object_ids_all().unwrap().is_empty());
    assert!(r.to_many(&dc1, "devices").unwrap().object_ids_all().unwrap().is_empty());
    assert_matches!(r.delete_entity(&a), Err(RelationsError::EntityNotFound(_)));
}

#[test]
fn copy_to_root_follows_copy_rules() {
    let r = relations(MemoryStore::new());
    let a = device(&r, "a");
    let g = group(&r, "core");
    let dc1 = location(&r, "dc1");
    let eth0 = add_interface(&r, &a, "eth0");
    r.to_many_cont(&eth0, "ips")
        .unwrap()
        .set_object(Entity::new("IpAddress", "10.0.0.1"))
        .unwrap();
    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();
    r.to_one(&a, "location").unwrap().add_relation(&dc1).unwrap();

    let copy = r.copy_to_root(&a, "/Devices/a2").unwrap();

    // containment is deep-copied
    let copied_eth0 = r
        .resolve(&PrimaryId::from("/Devices/a2/interfaces/eth0"))
        .unwrap();
    assert_eq!(r.to_one(&copied_eth0, "device").unwrap().get().unwrap(), Some(copy.clone()));
    assert!(r
        .try_resolve(&PrimaryId::from("/Devices/a2/interfaces/eth0/ips/10.0.0.1"))
        .unwrap()
        .is_some());

    // many-to-many links are shared, the no_copy location is not
    assert!(r.to_many(&g, "devices").unwrap().has_object(&copy).unwrap());
    assert!(r.to_many(&g, "devices").unwrap().has_object(&a).unwrap());
    assert_eq!(r.to_one(&copy, "location").unwrap().get().unwrap(), None);

    assert!(r.diagnose(&copy).unwrap().is_clean());
    assert!(r.diagnose(&a).unwrap().is_clean());
}

#[test]
fn copy_into_container() {
    let r = relations(MemoryStore::new());
    let linux = device_class(&r, "linux");
    let a = device(&r, "a");
    add_interface(&r, &a, "eth0");

    let copy = r.copy_entity(&a, &linux, "devices", "a-copy").unwrap();

    assert_eq!(copy.primary_id, PrimaryId::from("/Classes/linux/devices/a-copy"));
    assert_eq!(
        r.to_one(&copy, "device_class").unwrap().get().unwrap(),
        Some(linux.clone())
    );
    assert_eq!(
        r.to_many_cont(&copy, "interfaces").unwrap().object_ids().unwrap(),
        vec!["eth0"]
    );
    assert!(r.diagnose(&linux).unwrap().is_clean());
    assert_matches!(
        r.copy_entity(&a, &linux, "devices", "a-copy"),
        Err(RelationsError::InvalidId { .. })
    );
}

#[test]
fn move_rekeys_subtree_and_rewrites_links() {
    let r = relations(MemoryStore::new());
    let linux = device_class(&r, "linux");
    let bsd = device_class(&r, "bsd");
    let g = group(&r, "core");

    let srv = r
        .to_many_cont(&linux, "devices")
        .unwrap()
        .set_object(Entity::new("Device", "srv"))
        .unwrap();
    let eth0 = add_interface(&r, &srv, "eth0");
    r.to_many(&srv, "groups").unwrap().add_relation(&g).unwrap();

    let moved = r.move_entity(&srv, &bsd, "devices", None).unwrap();

    assert_eq!(moved.primary_id, PrimaryId::from("/Classes/bsd/devices/srv"));
    assert_eq!(r.try_resolve(&srv.primary_id).unwrap(), None);
    assert_eq!(r.try_resolve(&eth0.primary_id).unwrap(), None);

    let moved_eth0 = r
        .resolve(&PrimaryId::from("/Classes/bsd/devices/srv/interfaces/eth0"))
        .unwrap();
    assert_eq!(r.to_one(&moved_eth0, "device").unwrap().get().unwrap(), Some(moved.clone()));
    assert_eq!(r.to_one(&moved, "device_class").unwrap().get().unwrap(), Some(bsd.clone()));
    assert_eq!(
        r.to_many(&g, "devices").unwrap().object_ids_all().unwrap(),
        vec![moved.primary_id.clone()]
    );
    assert!(r.to_many_cont(&linux, "devices").unwrap().object_values_all().unwrap().is_empty());

    assert!(r.diagnose(&linux).unwrap().is_clean());
    assert!(r.diagnose(&bsd).unwrap().is_clean());
}

#[test]
fn move_rejects_taken_id() {
    let r = relations(MemoryStore::new());
    let linux = device_class(&r, "linux");
    let bsd = device_class(&r, "bsd");
    let srv = r
        .to_many_cont(&linux, "devices")
        .unwrap()
        .set_object(Entity::new("Device", "srv"))
        .unwrap();
    r.to_many_cont(&bsd, "devices")
        .unwrap()
        .set_object(Entity::new("Device", "srv"))
        .unwrap();

    assert_matches!(
        r.move_entity(&srv, &bsd, "devices", None),
        Err(RelationsError::InvalidId { .. })
    );
    let renamed = r.move_entity(&srv, &bsd, "devices", Some("srv2")).unwrap();
    assert_eq!(renamed.id, "srv2");
}

#[test]
fn root_creation_is_checked() {
    let r = relations(MemoryStore::new());
    device(&r, "a");

    assert_matches!(
        r.create_root(Entity::root("Device", "/Devices/a")),
        Err(RelationsError::InvalidId { .. })
    );
    assert_matches!(
        r.create_root(Entity::new("Device", "b")),
        Err(RelationsError::InvalidId { .. })
    );
    assert_matches!(
        r.create_root(Entity::root("Printer", "/Printers/p")),
        Err(RelationsError::UnknownEntityType(_))
    );
}

#[test]
fn save_updates_properties_only() {
    let r = relations(MemoryStore::new());
    let a = device(&r, "a");

    r.save(&a.clone().with_property("ip", "10.0.0.1")).unwrap();
    let stored = r.resolve(&a.primary_id).unwrap();
    assert_eq!(stored.property("ip"), Some("10.0.0.1"));
    assert_eq!(stored.type_name, "Device");
}

#[test]
fn relation_introspection() {
    let r = relations(MemoryStore::new());
    let a = device(&r, "a");

    let interfaces = r.relation(&a, "interfaces").unwrap();
    assert_eq!(interfaces.cardinality(), Cardinality::ToManyCont);
    assert_eq!(interfaces.base().remote_type(), Cardinality::ToOne);
    assert_eq!(interfaces.base().remote_type_name(), "toone");
    assert_eq!(interfaces.base().remote_class(), "Interface");
    assert_eq!(interfaces.base().remote_name(), "device");
    assert_eq!(interfaces.base().primary_id(), PrimaryId::from("/Devices/a/interfaces"));
    assert_eq!(interfaces.base().id(), "interfaces");
    assert_eq!(interfaces.base().parent(), &a);
    assert_eq!(interfaces.name(), "interfaces");
    assert!(!interfaces.base().is_copyable());
    assert!(!interfaces.base().is_moveable());

    let location = r.to_one(&a, "location").unwrap();
    assert_eq!(location.id(), "location");
    assert_eq!(location.parent(), &a);
    assert_eq!(location.remote_class(), "Location");
    assert_eq!(location.remote_name(), "devices");

    let names: Vec<String> = r
        .relations_of(&a)
        .unwrap()
        .iter()
        .map(|rel| rel.name().to_string())
        .collect();
    assert_eq!(names, vec!["device_class", "groups", "interfaces", "location"]);
}

#[test]
fn transient_interruptions_are_retried() {
    let retry = RetryPolicy::builder()
        .initial_delay(std::time::Duration::from_millis(1))
        .max_delay(std::time::Duration::from_millis(5))
        .build();
    let r = relations(MemoryStore::with_retry(retry));
    let a = device(&r, "a");
    let g = group(&r, "core");

    r.backend().interrupt_next(3);
    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();
    assert!(r.to_many(&g, "devices").unwrap().has_object(&a).unwrap());
}

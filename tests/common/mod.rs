// Shared fixture schema and backend-generic scenarios.
#![allow(dead_code, unused_macros)]

use assert_matches::assert_matches;
use netabase_relations::prelude::*;

/// Device/Interface/IpAddress containment tree, plus locations, groups and device classes.
pub fn network_schema() -> Schema {
    Schema::builder()
        .entity("DeviceClass", |t| t.to_many_cont("devices", "Device", "device_class"))
        .entity("Device", |t| {
            t.to_many_cont("interfaces", "Interface", "device")
                .to_one("location", "Location", "devices")
                .to_many("groups", "Group", "devices")
                .to_one("device_class", "DeviceClass", "devices")
                .no_copy("location")
        })
        .entity("Router", |t| t.extends("Device"))
        .entity("Interface", |t| {
            t.to_one("device", "Device", "interfaces")
                .to_many_cont("ips", "IpAddress", "interface")
        })
        .entity("IpAddress", |t| t.to_one("interface", "Interface", "ips"))
        .entity("Location", |t| t.to_many("devices", "Device", "location"))
        .entity("Group", |t| t.to_many("devices", "Device", "groups"))
        .build()
        .unwrap()
}

pub fn relations<B: RelationBackend>(backend: B) -> Relations<B> {
    Relations::new(network_schema(), backend)
}

pub fn device<B: RelationBackend>(r: &Relations<B>, id: &str) -> Entity {
    r.create_root(Entity::root("Device", format!("/Devices/{}", id)))
        .unwrap()
}

pub fn location<B: RelationBackend>(r: &Relations<B>, id: &str) -> Entity {
    r.create_root(Entity::root("Location", format!("/Locations/{}", id)))
        .unwrap()
}

pub fn group<B: RelationBackend>(r: &Relations<B>, id: &str) -> Entity {
    r.create_root(Entity::root("Group", format!("/Groups/{}", id)))
        .unwrap()
}

pub fn add_interface<B: RelationBackend>(r: &Relations<B>, device: &Entity, id: &str) -> Entity {
    r.to_many_cont(device, "interfaces")
        .unwrap()
        .set_object(Entity::new("Interface", id))
        .unwrap()
}

/// Remove an entity record behind the relation layer's back.
pub fn corrupt_delete<B: RelationBackend>(r: &Relations<B>, uid: &PrimaryId) {
    let mut batch = RelationBatch::new();
    batch.delete_entity(uid);
    r.backend().apply(&batch).unwrap();
}

pub fn add_makes_both_sides_visible<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let g = group(r, "core");

    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();
    assert!(r.to_many(&g, "devices").unwrap().has_object(&a).unwrap());
    assert_eq!(
        r.to_many(&a, "groups").unwrap().object_ids_all().unwrap(),
        vec![g.primary_id.clone()]
    );

    r.to_many(&g, "devices")
        .unwrap()
        .remove_relation(Some(&a), false)
        .unwrap();
    assert!(!r.to_many(&a, "groups").unwrap().has_object(&g).unwrap());
    assert!(!r.to_many(&g, "devices").unwrap().has_object(&a).unwrap());
}

pub fn to_one_replaces_previous_target<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let dc1 = location(r, "dc1");
    let dc2 = location(r, "dc2");

    let loc = r.to_one(&a, "location").unwrap();
    loc.add_relation(&dc1).unwrap();
    loc.add_relation(&dc2).unwrap();

    assert_eq!(loc.get().unwrap(), Some(dc2.clone()));
    assert_eq!(loc.object_ids_all().unwrap(), vec![dc2.primary_id.clone()]);
    assert_eq!(loc.related_id().unwrap(), Some("dc2".to_string()));
    assert!(!r.to_many(&dc1, "devices").unwrap().has_object(&a).unwrap());
    assert!(r.to_many(&dc2, "devices").unwrap().has_object(&a).unwrap());
}

pub fn to_one_readd_is_absorbed<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let dc1 = location(r, "dc1");
    let dc2 = location(r, "dc2");

    let loc = r.to_one(&a, "location").unwrap();
    loc.add_relation(&dc1).unwrap();
    loc.add_relation(&dc1).unwrap();
    assert_eq!(loc.count_objects().unwrap(), 1);

    assert_matches!(
        loc.add_link(&dc1),
        Err(RelationsError::RelationshipExists { .. })
    );
    assert_matches!(
        loc.remove_relation(Some(&dc2), false),
        Err(RelationsError::ObjectNotFound { .. })
    );

    loc.remove_relation(None, false).unwrap();
    loc.remove_relation(None, false).unwrap();
    assert_eq!(loc.get().unwrap(), None);
}

pub fn to_many_rejects_duplicates<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let g = group(r, "core");
    let groups = r.to_many(&a, "groups").unwrap();

    groups.add_relation(&g).unwrap();
    assert_matches!(
        groups.add_relation(&g),
        Err(RelationsError::RelationshipExists { .. })
    );
    assert_eq!(groups.count_objects().unwrap(), 1);
    assert_eq!(r.backend().link_count(&a.primary_id, "groups", &g.primary_id).unwrap(), 1);
}

pub fn to_many_remove_errors_and_remove_all<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let g1 = group(r, "g1");
    let g2 = group(r, "g2");
    let groups = r.to_many(&a, "groups").unwrap();

    assert_matches!(
        groups.remove_relation(Some(&g1), false),
        Err(RelationsError::ObjectNotFound { .. })
    );

    groups.add_relation(&g1).unwrap();
    groups.add_relation(&g2).unwrap();
    assert_eq!(groups.count_objects().unwrap(), 2);
    assert!(groups.object_ids().is_empty());
    assert_eq!(groups.object_values_all().unwrap().len(), 2);

    groups.remove_relation(None, false).unwrap();
    groups.remove_relation(None, false).unwrap();
    assert_eq!(groups.count_objects().unwrap(), 0);
    assert!(!r.to_many(&g1, "devices").unwrap().has_object(&a).unwrap());
    assert!(!r.to_many(&g2, "devices").unwrap().has_object(&a).unwrap());
}

pub fn to_many_add_displaces_remote_to_one<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let dc1 = location(r, "dc1");
    let dc2 = location(r, "dc2");

    r.to_one(&a, "location").unwrap().add_relation(&dc1).unwrap();
    r.to_many(&dc2, "devices").unwrap().add_relation(&a).unwrap();

    assert_eq!(r.to_one(&a, "location").unwrap().get().unwrap(), Some(dc2.clone()));
    assert!(!r.to_many(&dc1, "devices").unwrap().has_object(&a).unwrap());
    assert!(r.diagnose(&a).unwrap().is_clean());
}

pub fn schema_checks_on_add<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let dc1 = location(r, "dc1");

    assert_matches!(
        r.to_many(&a, "groups").unwrap().add_relation(&dc1),
        Err(RelationsError::SchemaViolation { .. })
    );
    assert_matches!(
        r.to_one(&a, "groups").err(),
        Some(RelationsError::WrongCardinality { .. })
    );
    assert_matches!(
        r.relation(&a, "printers").err(),
        Some(RelationsError::UnknownRelation { .. })
    );
    assert_matches!(
        r.to_many(&a, "groups")
            .unwrap()
            .add_relation_by_id(&PrimaryId::from("/Groups/missing")),
        Err(RelationsError::EntityNotFound(_))
    );
}

pub fn subtype_is_accepted<B: RelationBackend>(r: &Relations<B>) {
    let router = r
        .create_root(Entity::root("Router", "/Devices/r1"))
        .unwrap();
    let g = group(r, "core");

    r.to_many(&g, "devices").unwrap().add_relation(&router).unwrap();
    assert!(r.to_many(&router, "groups").unwrap().has_object(&g).unwrap());
}

pub fn containment_scenario<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let interfaces = r.to_many_cont(&a, "interfaces").unwrap();

    interfaces
        .add_relation(&Entity::new("Interface", "eth0"))
        .unwrap();
    let i1 = r
        .resolve(&PrimaryId::from("/Devices/a/interfaces/eth0"))
        .unwrap();
    assert_eq!(r.to_one(&i1, "device").unwrap().get().unwrap(), Some(a.clone()));
    assert_eq!(interfaces.object_values_all().unwrap(), vec![i1.clone()]);

    corrupt_delete(r, &i1.primary_id);

    let report = interfaces.check_relation(CheckMode::Repair).unwrap();
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::Dangling);
    assert!(interfaces.object_values_all().unwrap().is_empty());
    assert_eq!(interfaces.count_objects().unwrap(), 0);
}

pub fn containment_cascade<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let eth0 = add_interface(r, &a, "eth0");
    add_interface(r, &a, "eth1");
    let ip = r
        .to_many_cont(&eth0, "ips")
        .unwrap()
        .set_object(Entity::new("IpAddress", "10.0.0.1"))
        .unwrap();

    let interfaces = r.to_many_cont(&a, "interfaces").unwrap();
    assert_eq!(interfaces.object_ids().unwrap(), vec!["eth0", "eth1"]);
    assert_eq!(interfaces.count_objects().unwrap(), 2);

    interfaces.remove_relation(None, false).unwrap();

    assert!(interfaces.object_values_all().unwrap().is_empty());
    assert!(interfaces.contained_uids().unwrap().is_empty());
    assert_eq!(r.try_resolve(&eth0.primary_id).unwrap(), None);
    assert_eq!(r.try_resolve(&ip.primary_id).unwrap(), None);
    assert!(r.backend().links_from(&a.primary_id).unwrap().is_empty());
    assert!(r.backend().links_from(&eth0.primary_id).unwrap().is_empty());
}

pub fn containment_ids_are_validated<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let eth0 = add_interface(r, &a, "eth0");
    let interfaces = r.to_many_cont(&a, "interfaces").unwrap();

    for bad in ["", "..", "_hidden", "@x", "a/b", "eth0"] {
        assert_matches!(
            interfaces.check_valid_id(bad),
            Err(RelationsError::InvalidId { .. }),
            "id {:?} should be rejected",
            bad
        );
    }
    assert_matches!(
        interfaces.add_relation(&eth0),
        Err(RelationsError::RelationshipExists { .. })
    );

    let b = device(r, "b");
    assert_matches!(
        r.to_many_cont(&b, "interfaces").unwrap().add_relation(&eth0),
        Err(RelationsError::AlreadyContained { .. })
    );
    assert_matches!(
        r.to_one(&eth0, "device").unwrap().add_relation(&b),
        Err(RelationsError::ContainmentManaged { .. })
    );
}

pub fn report_mode_does_not_mutate<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let eth0 = add_interface(r, &a, "eth0");
    corrupt_delete(r, &eth0.primary_id);

    let interfaces = r.to_many_cont(&a, "interfaces").unwrap();
    let report = interfaces.check_relation(CheckMode::Report).unwrap();
    assert_eq!(report.violations.len(), 1);
    assert!(!report.violations[0].repaired);
    assert_eq!(
        interfaces.object_ids_all().unwrap(),
        vec![eth0.primary_id.clone()]
    );

    let again = r.diagnose(&a).unwrap();
    assert_eq!(again.violations.len(), 1);
}

pub fn repair_is_idempotent<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let g = group(r, "core");
    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();

    let mut batch = RelationBatch::new();
    batch.insert_link(&a.primary_id, "groups", &g.primary_id);
    r.backend().apply(&batch).unwrap();

    let first = r.repair(&a).unwrap();
    assert_eq!(first.violations.len(), 1);
    assert_eq!(first.violations[0].kind, ViolationKind::Duplicate { count: 2 });

    let links = r.to_many(&a, "groups").unwrap().object_ids_all().unwrap();
    assert_eq!(links, vec![g.primary_id.clone()]);

    let second = r.repair(&a).unwrap();
    assert!(second.is_clean());
    assert_eq!(r.to_many(&a, "groups").unwrap().object_ids_all().unwrap(), links);
}

pub fn asymmetric_link_is_healed_by_addition<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let g = group(r, "core");
    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();

    let mut batch = RelationBatch::new();
    batch.remove_link(&g.primary_id, "devices", &a.primary_id);
    r.backend().apply(&batch).unwrap();

    let report = r.diagnose(&a).unwrap();
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::Asymmetric);

    r.repair(&a).unwrap();
    assert!(r.to_many(&g, "devices").unwrap().has_object(&a).unwrap());
    assert!(r.diagnose(&a).unwrap().is_clean());
}

pub fn export_round_trip<B: RelationBackend>(r: &Relations<B>) {
    let a = device(r, "a");
    let g = group(r, "core");
    let eth0 = add_interface(r, &a, "eth0");
    add_interface(r, &a, "eth1");
    r.to_many_cont(&eth0, "ips")
        .unwrap()
        .set_object(Entity::new("IpAddress", "10.0.0.1"))
        .unwrap();
    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();

    let exported = netabase_relations::export::export_entity(r, &a).unwrap();
    let json = netabase_relations::export::to_json(&exported).unwrap();
    let parsed = netabase_relations::export::from_json(&json).unwrap();
    assert_eq!(parsed, exported);

    let b = netabase_relations::export::import_root(r, &parsed, "/Devices/b").unwrap();
    let interfaces = r.to_many_cont(&b, "interfaces").unwrap();
    assert_eq!(interfaces.object_ids().unwrap(), vec!["eth0", "eth1"]);
    for interface in interfaces.object_values_all().unwrap() {
        assert_eq!(r.to_one(&interface, "device").unwrap().get().unwrap(), Some(b.clone()));
    }
    let copied_eth0 = interfaces.get_ob("eth0").unwrap().unwrap();
    assert_eq!(r.to_many_cont(&copied_eth0, "ips").unwrap().object_ids().unwrap(), vec!["10.0.0.1"]);

    let members = r.to_many(&g, "devices").unwrap().object_ids_all().unwrap();
    assert_eq!(members, vec![a.primary_id.clone(), b.primary_id.clone()]);
    assert!(r.diagnose(&b).unwrap().is_clean());
}

/// Expands to one `#[test]` per scenario against the backend built by `$make`.
macro_rules! backend_scenarios {
    ($make:expr) => {
        #[test]
        fn add_makes_both_sides_visible() {
            common::add_makes_both_sides_visible(&common::relations($make));
        }

        #[test]
        fn to_one_replaces_previous_target() {
            common::to_one_replaces_previous_target(&common::relations($make));
        }

        #[test]
        fn to_one_readd_is_absorbed() {
            common::to_one_readd_is_absorbed(&common::relations($make));
        }

        #[test]
        fn to_many_rejects_duplicates() {
            common::to_many_rejects_duplicates(&common::relations($make));
        }

        #[test]
        fn to_many_remove_errors_and_remove_all() {
            common::to_many_remove_errors_and_remove_all(&common::relations($make));
        }

        #[test]
        fn to_many_add_displaces_remote_to_one() {
            common::to_many_add_displaces_remote_to_one(&common::relations($make));
        }

        #[test]
        fn schema_checks_on_add() {
            common::schema_checks_on_add(&common::relations($make));
        }

        #[test]
        fn subtype_is_accepted() {
            common::subtype_is_accepted(&common::relations($make));
        }

        #[test]
        fn containment_scenario() {
            common::containment_scenario(&common::relations($make));
        }

        #[test]
        fn containment_cascade() {
            common::containment_cascade(&common::relations($make));
        }

        #[test]
        fn containment_ids_are_validated() {
            common::containment_ids_are_validated(&common::relations($make));
        }

        #[test]
        fn report_mode_does_not_mutate() {
            common::report_mode_does_not_mutate(&common::relations($make));
        }

        #[test]
        fn repair_is_idempotent() {
            common::repair_is_idempotent(&common::relations($make));
        }

        #[test]
        fn asymmetric_link_is_healed_by_addition() {
            common::asymmetric_link_is_healed_by_addition(&common::relations($make));
        }

        #[test]
        fn export_round_trip() {
            common::export_round_trip(&common::relations($make));
        }
    };
}

//! Engine-level guarantees checked against constraint-enforcing tables.

use relmap_core::{CommandKind, Config, Phase};
use relmap_store::StatementKind;
use relmap_testkit::prelude::*;

fn position(plan: &relmap_core::Plan, entity: &Entity, kind: CommandKind) -> usize {
    plan.commands()
        .position(|cmd| cmd.kind == kind && cmd.target.as_ref() == Some(entity))
        .unwrap_or_else(|| panic!("no {kind} for {}", entity.role()))
}

#[test]
fn persisting_an_unchanged_entity_writes_nothing() {
    init_tracing();
    let fx = Fixture::blog();
    let id = fx.seed_user("ann", 2);
    let mapper = fx.mapper();
    let user = mapper.fetch_one("user", &row! { "id" => id }).unwrap().unwrap();

    let mut tx = fx.transaction();
    tx.persist(&user);
    assert!(tx.plan().unwrap().is_empty());
    let summary = tx.run().unwrap();

    assert_eq!(summary.writes(), 0);
    assert!(fx.statements().is_empty());
}

#[test]
fn unchanged_entity_with_loaded_children_writes_nothing() {
    let fx = Fixture::blog();
    let id = fx.seed_user("ann", 2);
    let mapper = fx.mapper();
    let user = mapper.fetch_one("user", &row! { "id" => id }).unwrap().unwrap();
    user.fetch("posts").unwrap();
    for post in user.related_many("posts") {
        post.fetch("comments").unwrap();
    }

    let mut tx = fx.transaction();
    tx.persist(&user);
    assert_eq!(tx.run().unwrap().writes(), 0);
    assert!(fx.statements().is_empty());
}

#[test]
fn two_cycle_is_two_inserts_and_one_deferred_update() {
    init_tracing();
    let fx = Fixture::pair();
    let (a, b) = fx.new_pair();

    let mut tx = fx.transaction();
    tx.persist(&a);
    let summary = tx.run().unwrap();

    assert_eq!(summary.inserts, 2);
    assert_eq!(summary.updates, 1);
    assert_eq!(summary.split_updates, 1);
    assert_eq!(summary.writes(), 3);
    let snap = tx.stats().snapshot();
    assert_eq!(snap.commands_planned, 3);
    assert_eq!(snap.split_updates, 1);
    assert_eq!((snap.inserts, snap.updates), (2, 1));
    let kinds: Vec<StatementKind> = fx.statements().iter().map(|s| s.kind()).collect();
    assert_eq!(
        kinds,
        vec![StatementKind::Insert, StatementKind::Insert, StatementKind::Update]
    );

    let reload = fx.reload();
    let a2 = reload.fetch_one("a", &row! { "id" => int(&a, "id") }).unwrap().unwrap();
    let b2 = a2.fetch("partner").unwrap().and_then(|v| v.loaded()).unwrap().remove(0);
    assert_eq!(b2.get("id"), b.get("id"));
    let back = b2.fetch("partner").unwrap().and_then(|v| v.loaded()).unwrap().remove(0);
    assert_eq!(back, a2);
}

#[test]
fn two_cycle_resolves_from_either_side() {
    for entry in 0..2 {
        let fx = Fixture::pair();
        let (a, b) = fx.new_pair();
        let mut tx = fx.transaction();
        tx.persist(if entry == 0 { &a } else { &b });
        let summary = tx.run().unwrap();

        assert_eq!((summary.inserts, summary.updates), (2, 1));
        assert_eq!(a.get("b_id"), b.get("id"));
        assert_eq!(b.get("a_id"), a.get("id"));
    }
}

#[test]
fn n_cycle_is_n_inserts_and_one_deferred_update_from_any_entry() {
    for len in 1..=5 {
        for entry in 0..len {
            let fx = Fixture::ring();
            let ring = new_ring(len);
            let mut tx = fx.transaction();
            tx.persist(&ring[entry]);
            let summary = tx.run().unwrap();

            assert_eq!(summary.inserts, len, "len {len} entry {entry}");
            assert_eq!(summary.updates, 1, "len {len} entry {entry}");
            assert_eq!(summary.split_updates, 1);
            for (i, link) in ring.iter().enumerate() {
                assert_eq!(link.get("next_id"), ring[(i + 1) % len].get("id"));
            }
            for row in fx.rows.rows("links") {
                assert!(!column(&row, "next_id").is_null(), "{}", fx.dump("links"));
            }
        }
    }
}

#[test]
fn disjoint_cycles_are_each_split_once() {
    let fx = Fixture::ring();
    let small = new_ring(3);
    let large = new_ring(4);
    let mut tx = fx.transaction();
    tx.persist(&small[1]);
    tx.persist(&large[3]);
    let summary = tx.run().unwrap();

    assert_eq!((summary.inserts, summary.updates), (7, 2));
    assert_eq!(summary.split_updates, 2);
    for ring in [&small, &large] {
        for (i, link) in ring.iter().enumerate() {
            assert_eq!(link.get("next_id"), ring[(i + 1) % ring.len()].get("id"));
        }
    }
    assert!(fx
        .rows
        .rows("links")
        .iter()
        .all(|row| !column(row, "next_id").is_null()));
}

#[test]
fn unsplittable_cycle_fails_before_any_write() {
    let fx = Fixture::locked_pair();
    let x = Entity::new("x");
    let y = Entity::new("y");
    x.set_one("partner", Some(&y));
    y.set_one("partner", Some(&x));

    let mut tx = fx.transaction();
    tx.persist(&x);
    let err = tx.run().unwrap_err();

    assert!(
        matches!(&err, CoreError::CyclicDependency { roles } if roles == &["x", "y"]),
        "{err}"
    );
    assert!(err.is_configuration());
    assert!(fx.statements().is_empty());
    assert_eq!(fx.with_node(&x, |n| n.map(|n| n.status)), Some(NodeStatus::New));
}

#[test]
fn disabled_splitting_reports_the_cycle() {
    let fx = Fixture::pair().with_config(Config::new().split_cycles(false));
    let (a, _b) = fx.new_pair();
    let mut tx = fx.transaction();
    tx.persist(&a);
    assert!(matches!(tx.run(), Err(CoreError::CyclicDependency { .. })));
    assert_eq!(fx.count("a_rows"), 0);
}

#[test]
fn child_holding_the_key_is_inserted_after_its_parent() {
    let fx = Fixture::blog();
    let user = fx.new_user("ann");
    let post = fx.new_post("hello");
    user.set_many("posts", vec![post.clone()]);

    let mut tx = fx.transaction();
    tx.persist(&user);
    let plan = tx.plan().unwrap();
    assert!(position(&plan, &post, CommandKind::Insert) > position(&plan, &user, CommandKind::Insert));

    tx.run().unwrap();
    assert_eq!(post.get("user_id"), user.get("id"));
}

#[test]
fn parent_holding_the_key_is_inserted_after_its_target() {
    let fx = Fixture::blog();
    let user = fx.new_user("ann");
    let post = fx.new_post("hello");
    post.set_one("author", Some(&user));

    let mut tx = fx.transaction();
    tx.persist(&post);
    let plan = tx.plan().unwrap();
    assert!(position(&plan, &user, CommandKind::Insert) < position(&plan, &post, CommandKind::Insert));

    tx.run().unwrap();
    assert_eq!(fx.count("users"), 1);
    assert_eq!(post.get("user_id"), user.get("id"));
}

#[test]
fn removed_required_child_is_deleted_and_nullable_child_is_unlinked() {
    let fx = Fixture::blog();
    let user = fx.new_user("ann");
    let kept = fx.new_post("kept");
    let dropped = fx.new_post("dropped");
    let note = Entity::new("note").with_field("body", "remember");
    user.set_many("posts", vec![kept.clone(), dropped.clone()]);
    user.set_many("notes", vec![note.clone()]);
    let mut tx = fx.transaction();
    tx.persist(&user);
    tx.run().unwrap();

    assert!(user.remove_related("posts", &dropped).unwrap());
    assert!(user.remove_related("notes", &note).unwrap());
    tx.persist(&user);
    let summary = tx.run().unwrap();

    let post_deletes = fx
        .statements()
        .iter()
        .filter(|s| s.kind() == StatementKind::Delete && s.table() == "posts")
        .count();
    assert_eq!(post_deletes, 1);
    assert_eq!(summary.updates, 1);
    assert_eq!(fx.count("posts"), 1);
    assert_eq!(fx.count("notes"), 1);
    assert!(column(&fx.rows.rows("notes")[0], "user_id").is_null());
    assert!(!fx.heap.lock().has(&dropped));
    assert_eq!(fx.with_node(&note, |n| n.map(|n| n.value("user_id"))), Some(Value::Null));
    assert_eq!(note.get("user_id"), Some(Value::Null));
}

#[test]
fn touched_nodes_are_managed_and_match_what_was_written() {
    let fx = Fixture::blog();
    let forest = Forest {
        users: vec![UserShape {
            name: "ann".into(),
            posts: vec![1, 2],
            notes: 1,
            address: true,
        }],
    };
    let roots = forest.build();
    let mut tx = fx.transaction();
    tx.persist_all(&roots);
    tx.run().unwrap();

    let heap = fx.heap.lock();
    assert_eq!(heap.len(), 1 + 1 + 2 + 3 + 1);
    for (entity, node) in heap.iter() {
        assert_eq!(node.status, NodeStatus::Managed, "{}", entity.role());
        for (field, value) in entity.fields() {
            assert_eq!(node.value(&field), value, "{}.{field}", entity.role());
        }
    }
    drop(heap);

    let user = &roots[0];
    let stored = &fx.rows.rows("users")[0];
    assert_eq!(column(stored, "name"), Value::from("ann"));
    assert_eq!(column(stored, "city"), Value::from("ann"));

    let written = fx.statements().len();
    tx.persist(user);
    assert_eq!(tx.run().unwrap().writes(), 0);
    assert_eq!(fx.statements().len(), written);
}

#[test]
fn failed_statement_stops_the_run_and_names_the_role() {
    let fx = Fixture::blog().with_faults(Faults::at_statement(2));
    let user = fx.new_user("ann");
    user.set_many("posts", vec![fx.new_post("one"), fx.new_post("two")]);

    let mut tx = fx.transaction();
    tx.persist(&user);
    let err = tx.run().unwrap_err();

    assert!(
        matches!(&err, CoreError::Transaction { role, kind: StatementKind::Insert, .. } if role == "post"),
        "{err}"
    );
    assert_eq!(err.failed_role(), Some("post"));
    // only the user insert ran, and the managed transaction rolled it back
    assert_eq!(fx.statements().len(), 1);
    assert_eq!(fx.count("users"), 0);
    assert!(!fx.rows.in_transaction());
    assert_eq!(tx.stats().runs_failed(), 1);
}

#[test]
fn ambient_transaction_is_left_to_the_caller() {
    let fx = Fixture::blog()
        .with_faults(Faults::on_table("posts"))
        .with_config(Config::new().manage_transaction(false));
    let user = fx.new_user("ann");
    user.set_many("posts", vec![fx.new_post("one")]);

    fx.rows.begin().unwrap();
    let mut tx = fx.transaction();
    tx.persist(&user);
    assert!(tx.run().is_err());

    assert!(fx.rows.in_transaction());
    assert_eq!(fx.count("users"), 1);
    fx.rows.rollback().unwrap();
    assert_eq!(fx.count("users"), 0);
}

#[test]
fn failed_run_can_restore_the_heap() {
    let fx = Fixture::pair()
        .with_faults(Faults::at_statement(3))
        .with_config(Config::new().reset_heap_on_failure(true));
    let (a, b) = fx.new_pair();
    let mut tx = fx.transaction();
    tx.persist(&a);
    assert!(tx.run().is_err());

    assert_eq!(a.get("id"), None);
    assert_eq!(b.get("a_id"), None);
    assert_eq!(fx.with_node(&a, |n| n.map(|n| n.status)), Some(NodeStatus::New));
    assert_eq!(fx.with_node(&b, |n| n.map(|n| n.status)), Some(NodeStatus::New));
}

#[test]
fn composite_key_cycles_resolve_like_single_keys() {
    for len in 2..=4 {
        let fx = Fixture::composite();
        let slots = new_slot_ring("eu", len);
        let mut tx = fx.transaction();
        tx.persist(&slots[len - 1]);
        let plan = tx.plan().unwrap();
        let deferred: Vec<_> = plan
            .commands()
            .filter(|c| matches!(c.phase, Phase::Deferred { .. }))
            .collect();
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred[0].bindings[0].pairs.len(), 2);

        let summary = tx.run().unwrap();
        assert_eq!((summary.inserts, summary.updates), (len, 1));
        for (i, slot) in slots.iter().enumerate() {
            let next = &slots[(i + 1) % len];
            assert_eq!(slot.get("peer_region"), Some(Value::from("eu")));
            assert_eq!(slot.get("peer_num"), next.get("num"));
        }
        assert!(fx
            .rows
            .rows("slots")
            .iter()
            .all(|row| !column(row, "peer_no").is_null()));
    }
}

#[test]
fn committed_entities_survive_a_later_failed_run() {
    let fx = Fixture::blog()
        .with_faults(Faults::on_table("notes"))
        .with_config(Config::new().reset_heap_on_failure(true));
    let user = fx.new_user("ann");
    let mut tx = fx.transaction();
    tx.persist(&user);
    tx.run().unwrap();

    user.set("name", "anna");
    user.set_many("notes", vec![Entity::new("note").with_field("body", "x")]);
    tx.persist(&user);
    assert!(tx.run().is_err());

    assert_eq!(column(&fx.rows.rows("users")[0], "name"), Value::from("ann"));
    // the node describes storage again; the entity keeps its pending change
    assert_eq!(fx.with_node(&user, |n| n.map(|n| n.value("name"))), Some(Value::from("ann")));
    assert_eq!(fx.with_node(&user, |n| n.map(|n| n.status)), Some(NodeStatus::Managed));
    assert_eq!(user.get("name"), Some(Value::from("anna")));
}

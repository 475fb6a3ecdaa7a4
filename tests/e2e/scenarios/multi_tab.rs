use crate::harness::{Assertion, Scenario};
use outline_core::{ChangeBatch, ChangeType, RawChange, RecordId, Table};
use serde_json::{json, Map};

/// A Created thought change as another process would publish it.
fn foreign_thought(value: &str, last_updated: i64, updated_by: &str) -> RawChange {
    let id = RecordId::hash_text(value);
    RawChange::created(
        Table::ThoughtIndex,
        id,
        json!({
            "id": id.as_hex(),
            "value": value,
            "contexts": [RecordId::root().as_hex()],
            "created": last_updated,
            "lastUpdated": last_updated,
            "updatedBy": updated_by,
        }),
    )
}

#[test]
fn test_remote_write_reaches_other_tab_only() {
    Scenario::new("echo_suppression")
        .tab("a")
        .tab("b")
        .add("a", &[], "Inbox")
        .sync("a")
        .sync("b")
        .assert(Assertion::MirrorUpdatedBy {
            tab: "b".into(),
            value: "Inbox".into(),
            session: "a".into(),
        })
        .assert_mirror_lacks("a", "Inbox")
        .assert_mirror_batches("a", 0)
        .assert_mirror_batches("b", 2)
        .run()
        .unwrap();
}

#[test]
fn test_updates_merge_into_other_tab() {
    Scenario::new("remote_updates")
        .tab("a")
        .tab("b")
        .add("a", &[], "Inbox")
        .advance_clock(1)
        .add("a", &["Inbox"], "Call mom")
        .sync("b")
        .assert(Assertion::MirrorContexts {
            tab: "b".into(),
            value: "Call mom".into(),
            parents: vec![vec!["Inbox".into()]],
        })
        .advance_clock(1)
        .add("a", &[], "Call mom")
        .sync("b")
        .assert(Assertion::MirrorContexts {
            tab: "b".into(),
            value: "Call mom".into(),
            parents: vec![vec!["Inbox".into()], vec![]],
        })
        .run()
        .unwrap();
}

#[test]
fn test_remote_delete_and_local_delete_echo() {
    Scenario::new("delete_propagation")
        .tab("a")
        .tab("b")
        .add("a", &[], "Inbox")
        .sync("b")
        .resync("a")
        .assert_mirror_has("a", "Inbox")
        .delete("a", "Inbox")
        .sync("a")
        .sync("b")
        // the writer applied its own delete already; its echo is dropped
        .assert_mirror_has("a", "Inbox")
        .assert_mirror_lacks("b", "Inbox")
        .run()
        .unwrap();
}

#[test]
fn test_stale_relayed_write_is_ignored() {
    Scenario::new("stale_relay")
        .tab("a")
        .tab("b")
        .add("a", &[], "Inbox")
        .sync("b")
        .relay(ChangeBatch::new(
            "laptop",
            vec![foreign_thought("Inbox", 1, "laptop")],
        ))
        .sync("b")
        .assert(Assertion::MirrorUpdatedBy {
            tab: "b".into(),
            value: "Inbox".into(),
            session: "a".into(),
        })
        .relay(ChangeBatch::new(
            "laptop",
            vec![foreign_thought("Inbox", 1_800_000_000_000, "laptop")],
        ))
        .sync("b")
        .assert(Assertion::MirrorUpdatedBy {
            tab: "b".into(),
            value: "Inbox".into(),
            session: "laptop".into(),
        })
        .run()
        .unwrap();
}

#[test]
fn test_null_members_and_malformed_changes_are_dropped() {
    let shared = RecordId::hash_text("Shared");
    let root = RecordId::root();

    let thought = RawChange::created(
        Table::ThoughtIndex,
        shared,
        json!({
            "value": "Shared",
            "contexts": [null, root.as_hex()],
            "lastUpdated": 5,
            "updatedBy": "laptop",
        }),
    );
    let context = RawChange::created(
        Table::ContextIndex,
        root,
        json!({
            "context": [],
            "children": [null, { "key": shared.as_hex(), "rank": 0.0 }],
            "lastUpdated": 5,
            "updatedBy": "laptop",
        }),
    );
    let malformed = RawChange {
        kind: ChangeType::Created,
        table: Table::ThoughtIndex.as_str().to_string(),
        key: "not-a-key".into(),
        obj: None,
        mods: None,
        old_obj: None,
    };

    Scenario::new("null_filtering")
        .tab("b")
        .relay(ChangeBatch::new("laptop", vec![malformed, thought, context]))
        .sync("b")
        .assert(Assertion::MirrorContexts {
            tab: "b".into(),
            value: "Shared".into(),
            parents: vec![vec![]],
        })
        .assert_mirror_batches("b", 1)
        .run()
        .unwrap();
}

#[test]
fn test_lagging_tab_is_dropped_and_resyncs() {
    Scenario::new("lagging_subscriber")
        .with_channel_capacity(2)
        .tab("a")
        .tab("b")
        .add("a", &[], "One")
        .add("a", &[], "Two")
        .sync("b")
        .assert_mirror_has("b", "One")
        .assert_mirror_lacks("b", "Two")
        .assert(Assertion::FeedClosed { tab: "b".into() })
        .resync("b")
        .assert_mirror_has("b", "Two")
        .add("a", &[], "Three")
        .sync("b")
        .assert_mirror_has("b", "Three")
        .run()
        .unwrap();
}

#[test]
fn test_local_updates_are_not_echoed() {
    Scenario::new("update_echo")
        .tab("a")
        .tab("b")
        .add("a", &[], "Inbox")
        .add("a", &[], "Call mom")
        .advance_clock(1)
        .add("a", &["Inbox"], "Call mom")
        .sync("a")
        .sync("b")
        .assert_mirror_batches("a", 0)
        .assert(Assertion::MirrorContexts {
            tab: "b".into(),
            value: "Call mom".into(),
            parents: vec![vec![], vec!["Inbox".into()]],
        })
        .run()
        .unwrap();
}

#[test]
fn test_padded_relation_update_has_no_gaps() {
    let shared = RecordId::hash_text("Shared");
    let elsewhere = RecordId::hash_path(&[RecordId::hash_text("Elsewhere")]);
    let mut mods = Map::new();
    mods.insert("contexts.3".into(), json!(elsewhere.as_hex()));
    mods.insert("lastUpdated".into(), json!(1_800_000_000_000i64));
    let padded = RawChange::updated(Table::ThoughtIndex, shared, mods, json!({}));

    Scenario::new("padded_update")
        .tab("a")
        .tab("b")
        .add("a", &[], "Shared")
        .sync("b")
        .relay(ChangeBatch::new("laptop", vec![padded]))
        .sync("b")
        .assert(Assertion::MirrorContexts {
            tab: "b".into(),
            value: "Shared".into(),
            parents: vec![vec![], vec!["Elsewhere".into()]],
        })
        .run()
        .unwrap();
}

#[test]
fn test_clear_all_deletes_other_sessions_writes() {
    Scenario::new("clear_after_foreign_write")
        .tab("a")
        .tab("b")
        .tab("c")
        .add("a", &[], "Inbox")
        .add("b", &[], "Late")
        .sync("c")
        .assert_mirror_has("c", "Late")
        .clear_all("a")
        .sync("c")
        .assert_mirror_lacks("c", "Inbox")
        .assert_mirror_lacks("c", "Late")
        .run()
        .unwrap();
}

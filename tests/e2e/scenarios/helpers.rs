use crate::harness::{Assertion, Scenario};
use outline_core::Store;

#[test]
fn test_cursor_set_and_clear() {
    Scenario::new("cursor")
        .tab("a")
        .tab("b")
        .import_fixture("a", "groceries")
        .set_cursor("a", &["Groceries", "Fruit"])
        .assert_cursor(Some(&["Groceries", "Fruit"][..]))
        .clear_cursor("b")
        .assert_cursor(None)
        .run()
        .unwrap();
}

#[test]
fn test_concurrent_cursor_updates_keep_one_value() {
    Scenario::new("concurrent_cursor")
        .tab("a")
        .tab("b")
        .tab("c")
        .concurrent_cursor_updates(&["a", "b", "c"])
        .assert(Assertion::CursorIsOneOf {
            values: vec!["a".into(), "b".into(), "c".into()],
        })
        .run()
        .unwrap();
}

#[test]
fn test_recently_edited_is_keyed_by_path() {
    Scenario::new("recently_edited")
        .tab("a")
        .mark_edited("a", &["Groceries"])
        .advance_clock(5)
        .mark_edited("a", &["Groceries", "Fruit"])
        .mark_edited("a", &["Groceries"])
        .assert(Assertion::RecentlyEditedCount(2))
        .run()
        .unwrap();
}

#[test]
fn test_clear_all_keeps_logs() {
    Scenario::new("clear_all")
        .tab("a")
        .tab("b")
        .import_fixture("a", "groceries")
        .set_cursor("a", &["Recipes"])
        .sync("b")
        .assert_mirror_has("b", "Apple")
        .assert(Assertion::Custom(Box::new(|store: &Store| {
            store.log("before clear", None)?;
            Ok(())
        })))
        .clear_all("a")
        .assert(Assertion::ThoughtCount(0))
        .assert_search("app", &[])
        .assert_cursor(None)
        .assert(Assertion::LogContains("before clear".into()))
        .sync("b")
        .assert_mirror_lacks("b", "Apple")
        .run()
        .unwrap();
}

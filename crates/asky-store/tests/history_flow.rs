//! End-to-end storage flows over a real SQLite file.

use asky_store::{DeleteSelector, HistoryStore};

fn store() -> HistoryStore {
    HistoryStore::open_in_memory().expect("open store")
}

#[test]
fn history_pairs_newest_first() {
    let s = store();
    s.save_interaction("a", "A", "m", "", "").unwrap();
    s.save_interaction("b", "B", "m", "", "").unwrap();

    let history = s.get_history(10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].query, "b");
    assert_eq!(history[0].answer, "B");
    assert_eq!(history[1].query, "a");
    assert_eq!(history[1].answer, "A");
}

#[test]
fn history_limit_zero_is_empty() {
    let s = store();
    s.save_interaction("a", "A", "m", "", "").unwrap();
    assert!(s.get_history(0).unwrap().is_empty());
}

#[test]
fn history_with_fewer_pairs_returns_all() {
    let s = store();
    s.save_interaction("only", "one", "m", "", "").unwrap();
    assert_eq!(s.get_history(5).unwrap().len(), 1);
}

#[test]
fn selector_context_expands_partner_and_excludes_others() {
    let s = store();
    // Rows 1,2 belong to ("a","A"); rows 3,4 to ("b","B").
    s.save_interaction("a", "A", "m", "", "").unwrap();
    let second = s.save_interaction("b", "B", "m", "", "").unwrap();
    assert_eq!(second, 4);

    let context = s.get_interaction_context(&[4], true).unwrap();
    assert!(context.contains("b"));
    assert!(context.contains("B"));
    assert!(!context.contains('a'));
    assert!(!context.contains('A'));
}

#[test]
fn compact_context_uses_summaries_and_prefixes() {
    let s = store();
    s.save_interaction("what is rust", "rust is a language", "m", "q-sum", "a-sum")
        .unwrap();
    let context = s.get_interaction_context(&[2], false).unwrap();
    assert!(context.contains("Query: q-sum"));
    assert!(context.contains("Answer: a-sum"));
}

#[test]
fn interaction_by_id_resolves_partner_both_directions() {
    let s = store();
    let assistant_id = s.save_interaction("q1", "ans1", "m", "", "").unwrap();
    let user_id = assistant_id - 1;

    let from_assistant = s.get_interaction_by_id(assistant_id).unwrap().unwrap();
    assert_eq!(from_assistant.query, "q1");
    assert_eq!(from_assistant.answer, "ans1");

    let from_user = s.get_interaction_by_id(user_id).unwrap().unwrap();
    assert_eq!(from_user.query, "q1");
    assert_eq!(from_user.answer, "ans1");
}

#[test]
fn delete_expands_to_partner_rows() {
    let s = store();
    let assistant_id = s.save_interaction("q", "a", "m", "", "").unwrap();
    let deleted = s
        .delete_messages(&DeleteSelector::Ids(vec![assistant_id]))
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(s.record_count().unwrap(), 0);
}

#[test]
fn delete_sessions_cascades_messages() {
    let s = store();
    let sid = s.create_session("m", Some("work"), false, None).unwrap();
    s.save_message(sid, "user", "hello", "", 3).unwrap();
    s.save_message(sid, "assistant", "hi", "", 2).unwrap();

    let deleted = s.delete_sessions(&DeleteSelector::Ids(vec![sid])).unwrap();
    assert_eq!(deleted, 1);
    assert!(s.get_session_messages(sid).unwrap().is_empty());
    assert!(s.get_session_by_id(sid).unwrap().is_none());
}

#[test]
fn compaction_keeps_raw_messages() {
    let s = store();
    let sid = s.create_session("m", Some("long"), false, None).unwrap();
    for i in 0..6 {
        s.save_message(sid, "user", &format!("q{i}"), "", 10).unwrap();
        s.save_message(sid, "assistant", &format!("a{i}"), "", 10).unwrap();
    }
    s.compact_session(sid, "summary of early turns").unwrap();

    let session = s.get_session_by_id(sid).unwrap().unwrap();
    assert_eq!(session.compacted_summary.as_deref(), Some("summary of early turns"));
    assert_eq!(s.get_session_messages(sid).unwrap().len(), 12);
}

#[test]
fn find_sessions_by_id_and_exact_name() {
    let s = store();
    let sid = s.create_session("m", Some("paris-trip"), false, None).unwrap();
    s.create_session("m", Some("paris-trip"), false, None).unwrap();

    let by_id = s.find_sessions(&sid.to_string()).unwrap();
    assert_eq!(by_id.len(), 1);

    let by_name = s.find_sessions("paris-trip").unwrap();
    assert_eq!(by_name.len(), 2);

    assert!(s.find_sessions("nothing-here").unwrap().is_empty());
}

#[test]
fn convert_history_to_session_copies_pair() {
    let s = store();
    let assistant_id = s
        .save_interaction("plan a trip to norway", "sure, here's a plan", "m", "", "")
        .unwrap();
    let sid = s.convert_history_to_session(assistant_id).unwrap();

    let messages = s.get_session_messages(sid).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role.as_deref(), Some("user"));
    assert_eq!(messages[1].role.as_deref(), Some("assistant"));

    let session = s.get_session_by_id(sid).unwrap().unwrap();
    assert_eq!(session.name.as_deref(), Some("plan a trip to norway"));
}

#[test]
fn user_memory_scope_filtering() {
    let s = store();
    let blob = vec![0u8; 8];
    s.save_user_memory("global fact", None, None, Some(&blob), Some("test-model"))
        .unwrap();
    s.save_user_memory("session fact", None, Some(42), Some(&blob), Some("test-model"))
        .unwrap();

    let global_view = s.user_memories_with_embeddings(None).unwrap();
    assert_eq!(global_view.len(), 1);
    assert_eq!(global_view[0].0.content, "global fact");

    let session_view = s.user_memories_with_embeddings(Some(42)).unwrap();
    assert_eq!(session_view.len(), 2);
}

#[test]
fn elephant_flag_and_max_turns_roundtrip() {
    let s = store();
    let sid = s.create_session("m", None, true, Some(8)).unwrap();
    let session = s.get_session_by_id(sid).unwrap().unwrap();
    assert!(session.memory_auto_extract);
    assert_eq!(session.max_turns, Some(8));

    s.set_session_memory_auto_extract(sid, false).unwrap();
    s.update_session_max_turns(sid, 3).unwrap();
    let session = s.get_session_by_id(sid).unwrap().unwrap();
    assert!(!session.memory_auto_extract);
    assert_eq!(session.max_turns, Some(3));
}

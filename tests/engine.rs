//! Cross-module scenarios (parse -> plan -> execute against the in-memory
//! store) that don't fit naturally in any single module's unit tests.

use flowql::datasource::memory::MemoryStore;
use flowql::datasource::ConnUpsert;
use flowql::driver::{ConnInfo, Engine};
use flowql::exec::sink::Sink;
use flowql::exec::source::SourceTask;
use flowql::exec::where_task::WhereTask;
use flowql::exec::{channel, join_all, spawn_task, ErrorSlot, Task};
use flowql::planner::EngineConfig;
use flowql::value::Value;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn users_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("mem"));
    store.create_table("users", vec!["user_id".to_string(), "name".to_string(), "email".to_string()]);
    store
}

#[tokio::test]
async fn select_with_where_end_to_end_against_memory_store() {
    let store = users_store();
    store.put("users", Some(Value::Int(1)), vec![Value::Int(1), Value::string("aaron"), Value::string("a@x.com")]).unwrap();
    store.put("users", Some(Value::Int(2)), vec![Value::Int(2), Value::string("bex"), Value::string("b@x.com")]).unwrap();

    let mut config = EngineConfig::new();
    config.register("users", store);
    let engine = Engine::open(ConnInfo::new("memory://users"), config);

    let mut cursor = engine.run("SELECT name FROM users WHERE user_id = 2", &[]).await.unwrap();
    let row = cursor.next_row().expect("one matching row");
    assert_eq!(row.get("name"), Some(&Value::string("bex")));
    assert!(cursor.next_row().is_none());
}

#[tokio::test]
async fn insert_then_select_round_trips_through_the_planner() {
    let store = users_store();
    let mut config = EngineConfig::new();
    config.register("users", store);
    let engine = Engine::open(ConnInfo::new("memory://users"), config);

    let mut insert_cursor = engine
        .run("INSERT INTO users (user_id, name, email) VALUES (9, 'zoe', 'z@x.com')", &[])
        .await
        .unwrap();
    let summary = insert_cursor.next_row().unwrap();
    assert_eq!(summary.get("affected"), Some(&Value::Int(1)));

    let mut select_cursor = engine.run("SELECT email FROM users WHERE user_id = 9", &[]).await.unwrap();
    let row = select_cursor.next_row().unwrap();
    assert_eq!(row.get("email"), Some(&Value::string("z@x.com")));
}

#[tokio::test]
async fn hash_join_emits_cartesian_product_of_matched_keys_only() {
    let left = Arc::new(MemoryStore::new("left"));
    left.create_table("people", vec!["name".to_string(), "age".to_string()]);
    left.put("people", Some(Value::Int(1)), vec![Value::string("alice"), Value::Int(30)]).unwrap();
    left.put("people", Some(Value::Int(2)), vec![Value::string("nomatch"), Value::Int(1)]).unwrap();

    let right = Arc::new(MemoryStore::new("right"));
    right.create_table("emails", vec!["name".to_string(), "email".to_string()]);
    right.put("emails", Some(Value::Int(1)), vec![Value::string("alice"), Value::string("a@x.com")]).unwrap();

    let mut config = EngineConfig::new();
    config.register("people", left);
    config.register("emails", right);
    let engine = Engine::open(ConnInfo::new("memory://join"), config);

    let mut cursor = engine.run("SELECT age, email FROM people JOIN emails ON name = name", &[]).await.unwrap();
    let row = cursor.next_row().expect("alice matches");
    assert_eq!(row.get("age"), Some(&Value::Int(30)));
    assert_eq!(row.get("email"), Some(&Value::string("a@x.com")));
    assert!(cursor.next_row().is_none(), "non-matching left row must not appear");
}

#[tokio::test]
async fn executor_delivers_exactly_n_messages_through_a_tautology_where() {
    use flowql::ast::Node;
    use flowql::datasource::Message;
    use flowql::value::Value as V;

    let columns = Arc::new(vec!["n".to_string()]);
    let rows: Vec<Message> = (0..25).map(|n| Message::tuple(columns.clone(), vec![V::Int(n)])).collect();
    let count = rows.len();

    let cancel = CancellationToken::new();
    let errors = ErrorSlot::new();
    let mut handles = Vec::new();

    let (src_tx, src_rx) = channel();
    handles.push(spawn_task(SourceTask::new(Box::new(rows.into_iter()), src_tx, cancel.clone()), cancel.clone(), errors.clone()));

    let (where_tx, where_rx) = channel();
    handles.push(spawn_task(
        WhereTask::new(Node::Literal(V::Bool(true)), chrono::Utc::now(), src_rx, where_tx, cancel.clone()),
        cancel.clone(),
        errors.clone(),
    ));

    let mut sink = Sink::new(where_rx, cancel.clone());
    let sink_handle = tokio::spawn(async move {
        Task::run(&mut sink).await.unwrap();
        sink
    });

    join_all(handles).await.unwrap();
    let sink = sink_handle.await.unwrap();
    assert_eq!(sink.rows().len(), count);
}

#[tokio::test]
async fn cancellation_stops_the_stream_promptly() {
    use flowql::ast::Node;
    use flowql::datasource::Message;
    use flowql::value::Value as V;

    let columns = Arc::new(vec!["n".to_string()]);
    let (src_tx, src_rx) = channel();
    let cancel = CancellationToken::new();
    let errors = ErrorSlot::new();
    let mut handles = Vec::new();

    let (where_tx, mut where_rx) = channel();
    handles.push(spawn_task(
        WhereTask::new(Node::Literal(V::Bool(true)), chrono::Utc::now(), src_rx, where_tx, cancel.clone()),
        cancel.clone(),
        errors.clone(),
    ));

    for n in 0..5 {
        src_tx.send(Message::tuple(columns.clone(), vec![V::Int(n)])).await.unwrap();
    }
    let first = where_rx.recv().await.expect("at least one message before cancel");
    assert_eq!(first.get("n"), Some(&V::Int(0)));

    cancel.cancel();
    let mut extra = 0;
    while where_rx.recv().await.is_some() {
        extra += 1;
        if extra > 1 {
            break;
        }
    }
    assert!(extra <= 1, "at most one in-flight message may land after cancel");
    drop(src_tx);
    join_all(handles).await.unwrap();
}

#[tokio::test]
async fn date_math_where_clause_resolves_through_the_real_parser() {
    let store = Arc::new(MemoryStore::new("mem"));
    store.create_table("events", vec!["int5".to_string(), "created".to_string()]);
    let now = chrono::Utc::now();
    store.put("events", Some(Value::Int(1)), vec![Value::Int(5), Value::Time(now - chrono::Duration::days(2))]).unwrap();
    store.put("events", Some(Value::Int(2)), vec![Value::Int(5), Value::Time(now + chrono::Duration::days(2))]).unwrap();

    let mut config = EngineConfig::new();
    config.register("events", store);
    let engine = Engine::open(ConnInfo::new("memory://events"), config);

    let mut cursor = engine.run(r#"SELECT int5 FROM events WHERE created < "now-1d""#, &[]).await.unwrap();
    let row = cursor.next_row().expect("the row created two days ago must match");
    assert_eq!(row.get("int5"), Some(&Value::Int(5)));
    assert!(cursor.next_row().is_none(), "the row created in the future must not match");
}

#[tokio::test]
async fn include_resolves_a_named_filter_registered_on_engine_config() {
    use flowql::ast::{BinaryOp, Node};

    let store = users_store();
    store.put("users", Some(Value::Int(1)), vec![Value::Int(1), Value::string("aaron"), Value::string("a@x.com")]).unwrap();
    store.put("users", Some(Value::Int(2)), vec![Value::Int(2), Value::string("bex"), Value::string("b@x.com")]).unwrap();

    let mut config = EngineConfig::new();
    config.register("users", store);
    config.register_filter(
        "is_bex",
        Node::Binary(BinaryOp::Eq, Box::new(Node::Identity("name".into())), Box::new(Node::Literal(Value::string("bex")))),
    );
    let engine = Engine::open(ConnInfo::new("memory://users"), config);

    let mut cursor = engine.run("SELECT name FROM users WHERE include is_bex", &[]).await.unwrap();
    let row = cursor.next_row().expect("one matching row");
    assert_eq!(row.get("name"), Some(&Value::string("bex")));
    assert!(cursor.next_row().is_none());
}

#[tokio::test]
async fn include_of_unknown_filter_name_is_a_plan_error() {
    let store = users_store();
    let mut config = EngineConfig::new();
    config.register("users", store);
    let engine = Engine::open(ConnInfo::new("memory://users"), config);

    let err = engine.run("SELECT name FROM users WHERE include missing_filter", &[]).await.unwrap_err();
    assert!(err.to_string().contains("missing_filter"));
}

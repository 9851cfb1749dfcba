// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end scenarios against an in-process stand-in for the engine.
//!
//! The stand-in understands just enough of HSET / HGETALL / UNLINK /
//! FT.SEARCH / FT.AGGREGATE / FT.CURSOR to exercise a collection through its
//! public API without Docker.
//!
//! Run with: `cargo test --test scenarios`

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use record_search::connection::memory::RecordingConnection;
use record_search::schema::{FieldSpec, RecordSchema, StorageType};
use record_search::{
    Collection, Command, Filter, Pipeline, Record, RecordQuery, Reducer, Reply, SearchError, SortBy,
};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Person {
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Age")]
    age: i64,
    #[serde(rename = "Skills", default)]
    skills: Vec<String>,
}

impl Record for Person {
    fn schema() -> RecordSchema {
        RecordSchema::new("Person", StorageType::Hash)
            .field(FieldSpec::string("Name").searchable())
            .field(FieldSpec::integer("Age").indexed().sortable())
            .field(FieldSpec::array(FieldSpec::string("Skills")).indexed())
    }
}

fn person(id: &str, name: &str, age: i64, skill: &str) -> Person {
    Person {
        id: id.into(),
        name: name.into(),
        age,
        skills: vec![skill.into()],
    }
}

#[derive(Default)]
struct Engine {
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    /// Rows still held behind the open cursor.
    pending: Vec<Reply>,
}

type Store = Arc<Mutex<Engine>>;

const CURSOR_ID: i64 = 7;

/// Recording connection backed by a tiny hash store.
fn engine() -> (Arc<RecordingConnection>, Store) {
    let store: Store = Arc::new(Mutex::new(Engine::default()));
    let shared = Arc::clone(&store);
    let conn = RecordingConnection::with_responder(move |command: &Command| respond(&shared, command));
    (Arc::new(conn), store)
}

fn pairs(hash: &BTreeMap<String, String>) -> Reply {
    Reply::Array(hash.iter().flat_map(|(k, v)| [Reply::text(k), Reply::text(v)]).collect())
}

fn respond(store: &Store, command: &Command) -> record_search::Result<Reply> {
    let args = command.text_args();
    let mut engine = store.lock();
    match command.name {
        "HSET" => {
            let hash = engine.hashes.entry(args[0].clone()).or_default();
            for pair in args[1..].chunks(2) {
                hash.insert(pair[0].clone(), pair[1].clone());
            }
            Ok(Reply::Integer(((args.len() - 1) / 2) as i64))
        }
        "HDEL" => {
            let hash = engine.hashes.entry(args[0].clone()).or_default();
            let removed = args[1..].iter().filter(|f| hash.remove(*f).is_some()).count();
            Ok(Reply::Integer(removed as i64))
        }
        "HGETALL" => Ok(engine
            .hashes
            .get(&args[0])
            .map(pairs)
            .unwrap_or_else(|| Reply::Array(vec![]))),
        "UNLINK" => Ok(Reply::Integer(i64::from(engine.hashes.remove(&args[0]).is_some()))),
        "FT.SEARCH" => {
            // Every stored record matches; only LIMIT is honoured.
            let (offset, count) = match args.iter().position(|a| a == "LIMIT") {
                Some(i) => (args[i + 1].parse().unwrap(), args[i + 2].parse().unwrap()),
                None => (0, 10),
            };
            let mut items = vec![Reply::Integer(engine.hashes.len() as i64)];
            for (key, hash) in engine.hashes.iter().skip(offset).take(count) {
                items.push(Reply::text(key));
                items.push(pairs(hash));
            }
            Ok(Reply::Array(items))
        }
        "FT.AGGREGATE" => {
            let mut groups: BTreeMap<String, i64> = BTreeMap::new();
            for hash in engine.hashes.values() {
                for skill in hash.get("Skills").map(String::as_str).unwrap_or("").split('|') {
                    *groups.entry(skill.to_string()).or_default() += 1;
                }
            }
            let mut rows: Vec<Reply> = groups
                .into_iter()
                .map(|(skill, n)| {
                    Reply::Array(vec![
                        Reply::text("Skills"),
                        Reply::text(skill),
                        Reply::text("COUNT"),
                        Reply::text(n.to_string()),
                    ])
                })
                .collect();
            let mut body = vec![Reply::Integer(rows.len() as i64)];
            match args.iter().position(|a| a == "WITHCURSOR") {
                None => {
                    body.extend(rows);
                    Ok(Reply::Array(body))
                }
                Some(i) => {
                    let page: usize = args[i + 2].parse().unwrap();
                    let rest = rows.split_off(page.min(rows.len()));
                    let id = if rest.is_empty() { 0 } else { CURSOR_ID };
                    engine.pending = rest;
                    body.extend(rows);
                    Ok(Reply::Array(vec![Reply::Array(body), Reply::Integer(id)]))
                }
            }
        }
        "FT.CURSOR" if args[0] == "READ" => {
            assert_eq!(args[2], CURSOR_ID.to_string());
            let mut body = vec![Reply::Integer(0)];
            body.append(&mut engine.pending);
            Ok(Reply::Array(vec![Reply::Array(body), Reply::Integer(0)]))
        }
        "FT.CURSOR" => Err(SearchError::Protocol("Cursor not found".into())),
        _ => Ok(Reply::ok()),
    }
}

async fn seeded() -> (Arc<RecordingConnection>, Store, Collection<Person, RecordingConnection>) {
    let (conn, store) = engine();
    let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
    people.create_index_async().await.unwrap();
    for mut p in [
        person("1", "Ada", 36, "math"),
        person("2", "Grace", 45, "navy"),
        person("3", "Alan", 41, "math"),
        person("4", "Edsger", 72, "proofs"),
        person("5", "Barbara", 30, "math"),
    ] {
        people.insert_async(&mut p).await.unwrap();
    }
    conn.clear();
    (conn, store, people)
}

fn lines(conn: &RecordingConnection) -> Vec<String> {
    conn.commands().iter().map(|c| c.to_string()).collect()
}

// =============================================================================
// Aggregation
// =============================================================================

#[tokio::test]
async fn scenario_group_by_skills_counts_every_record() {
    let (conn, _store, people) = seeded().await;
    let pipeline = Pipeline::new().group_by(["Skills"]).reduce(Reducer::Count);

    let rows = people.aggregate_async(&pipeline).unwrap().collect().await.unwrap();

    assert_eq!(
        lines(&conn),
        vec!["FT.AGGREGATE person-idx * GROUPBY 1 @Skills REDUCE COUNT 0 AS COUNT"]
    );
    assert_eq!(rows.len(), 3);
    let total: i64 = rows.iter().map(|r| r.get_i64("COUNT").unwrap()).sum();
    assert_eq!(total, 5);
    let math = rows.iter().find(|r| r.get_str("Skills") == Some("math")).unwrap();
    assert_eq!(math.get_i64("COUNT"), Some(3));
}

#[tokio::test]
async fn scenario_cursor_reads_until_exhausted() {
    let (conn, _store, people) = seeded().await;
    let pipeline = Pipeline::new()
        .group_by(["Skills"])
        .reduce(Reducer::Count)
        .with_cursor(2);

    let mut cursor = people.aggregate_async(&pipeline).unwrap();
    let first = cursor.next_page().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    let second = cursor.next_page().await.unwrap().unwrap();
    assert_eq!(second.len(), 1);
    assert!(cursor.next_page().await.unwrap().is_none());
    cursor.close().await;

    let sent = lines(&conn);
    assert_eq!(sent.len(), 2, "exhausted cursors are not deleted: {:?}", sent);
    assert!(sent[0].ends_with("WITHCURSOR COUNT 2"));
    assert_eq!(sent[1], format!("FT.CURSOR READ person-idx {} COUNT 2", CURSOR_ID));

    let total: i64 = first.iter().chain(&second).map(|r| r.get_i64("COUNT").unwrap()).sum();
    assert_eq!(total, 5);
}

#[tokio::test]
async fn scenario_abandoned_cursor_is_deleted() {
    let (conn, _store, people) = seeded().await;
    let pipeline = Pipeline::new()
        .group_by(["Skills"])
        .reduce(Reducer::Count)
        .with_cursor(1);

    let mut cursor = people.aggregate_async(&pipeline).unwrap();
    assert_eq!(cursor.next_page().await.unwrap().unwrap().len(), 1);
    cursor.close().await;

    assert_eq!(conn.count("FT.CURSOR"), 1);
    assert_eq!(
        lines(&conn).last().unwrap(),
        &format!("FT.CURSOR DEL person-idx {}", CURSOR_ID)
    );
}

#[test]
fn scenario_blocking_aggregation_matches_async() {
    let (conn, _store) = engine();
    let mut people = Collection::<Person, _>::new(Arc::clone(&conn)).unwrap();
    for mut p in [person("1", "Ada", 36, "math"), person("2", "Alan", 41, "math")] {
        people.insert(&mut p).unwrap();
    }
    let rows: Vec<_> = people
        .aggregate(&Pipeline::new().group_by(["Skills"]).reduce(Reducer::Count))
        .unwrap()
        .collect::<record_search::Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64("COUNT"), Some(2));
}

// =============================================================================
// Search, pagination and tracking
// =============================================================================

#[tokio::test]
async fn scenario_numeric_window_compiles_to_single_interval() {
    let (conn, _store, mut people) = seeded().await;
    let query = RecordQuery::new().filter(Filter::gt("Age", 20) & Filter::le("Age", 65));
    people.fetch_all_async(query).await.unwrap();
    assert!(lines(&conn)[0].starts_with("FT.SEARCH person-idx @Age:[(20 65] LIMIT 0 100"));
}

#[tokio::test]
async fn scenario_paging_then_saving_a_change() {
    let (conn, store, mut people) = seeded().await;

    let everyone = people
        .fetch_all_async(RecordQuery::new().page_size(2))
        .await
        .unwrap();
    assert_eq!(everyone.len(), 5);
    assert_eq!(conn.count("FT.SEARCH"), 3);
    assert_eq!(people.tracked_len(), 5);

    let mut grace = everyone.into_iter().find(|p| p.name == "Grace").unwrap();
    conn.clear();
    grace.age += 1;
    assert_eq!(people.save_async(&mut grace).await.unwrap(), 1);
    assert_eq!(lines(&conn), vec!["HSET Person:2 Age 46"]);
    assert_eq!(store.lock().hashes["Person:2"]["Age"], "46");

    conn.clear();
    assert_eq!(people.save_async(&mut grace).await.unwrap(), 0);
    assert!(conn.commands().is_empty());
}

#[tokio::test]
async fn scenario_removed_skills_are_deleted_from_the_hash() {
    let (conn, store, mut people) = seeded().await;
    let mut ada = people.find_by_id_async("1").await.unwrap().unwrap();
    assert_eq!(ada.skills, vec!["math"]);

    conn.clear();
    ada.name = "Augusta".into();
    ada.skills.push("poetry".into());
    people.save_async(&mut ada).await.unwrap();
    assert_eq!(lines(&conn), vec!["HSET Person:1 Name Augusta Skills math|poetry"]);
    assert_eq!(store.lock().hashes["Person:1"]["Skills"], "math|poetry");
}

#[tokio::test]
async fn scenario_delete_then_lookup() {
    let (_conn, _store, mut people) = seeded().await;
    let alan = people.find_by_id_async("3").await.unwrap().unwrap();
    assert!(people.delete_async(&alan).await.unwrap());
    assert!(people.find_by_id_async("3").await.unwrap().is_none());
    assert!(!people.delete_key_async("Person:3").await.unwrap());
}

#[tokio::test]
async fn scenario_compile_errors_send_nothing() {
    let (conn, _store, mut people) = seeded().await;

    let bad_sort = RecordQuery::new().sort_by(SortBy::asc("Nickname"));
    assert!(people.pager(bad_sort).is_err());

    let ordering_on_text = RecordQuery::new().filter(Filter::gt("Name", "M"));
    assert!(matches!(people.pager(ordering_on_text), Err(SearchError::Translation(_))));

    assert!(people
        .aggregate_async(&Pipeline::new().group_by(["Nickname"]))
        .is_err());
    assert!(conn.commands().is_empty());
}

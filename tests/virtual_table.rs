use rusqlite::types::{Type, Value, ValueRef};
use rusqlite::{params, Connection};
use sqlattr::codec::{encode, SEPARATOR_CHAR};
use sqlattr::config::Settings;
use sqlattr::vtab::identity_arg;

fn setup() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    sqlattr::register(&conn, &Settings::default()).unwrap();
    conn.execute_batch("create virtual table things using attributes")
        .unwrap();
    conn
}

fn insert(conn: &Connection, attributes: &str) -> i64 {
    conn.execute("insert into things (attributes) values (?1)", [attributes])
        .unwrap();
    conn.last_insert_rowid()
}

fn ids(conn: &Connection, sql: &str) -> Vec<i64> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt.query_map([], |r| r.get(0)).unwrap();
    let mut ids = rows.collect::<rusqlite::Result<Vec<i64>>>().unwrap();
    ids.sort();
    ids
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).unwrap()
}

#[test]
fn scenario_a_lookups_on_one_entity() {
    let conn = setup();
    insert(&conn, &encode([("color", "red"), ("size", "M")]));
    let (color, has_size, has_weight): (String, bool, bool) = conn
        .query_row(
            "select get_attr(attributes, 'color'), has_attr(attributes, 'size'), has_attr(attributes, 'weight') from things",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(color, "red");
    assert!(has_size);
    assert!(!has_weight);
}

#[test]
fn scenario_b_selective_match() {
    let conn = setup();
    let red = insert(&conn, &encode([("color", "red")]));
    let blue = insert(&conn, &encode([("color", "blue")]));
    assert_eq!(
        ids(&conn, "select id from things where attributes match ('color' || char(31) || 'red')"),
        vec![red]
    );
    assert_eq!(
        ids(&conn, "select id from things where attributes match 'color'"),
        vec![red, blue]
    );
    assert_eq!(
        ids(&conn, "select id from things where attributes match 'weight'"),
        Vec::<i64>::new()
    );
}

#[test]
fn scenario_c_update_replaces_attributes() {
    let conn = setup();
    let x = insert(&conn, &encode([("a", "1")]));
    conn.execute(
        "update things set attributes = pack_attrs('b', '2') where id = ?1",
        [x],
    )
    .unwrap();
    let (a, b): (Option<String>, Option<String>) = conn
        .query_row(
            "select get_attr(attributes, 'a'), get_attr(attributes, 'b') from things where id = ?1",
            [x],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(a, None);
    assert_eq!(b.as_deref(), Some("2"));
    assert_eq!(ids(&conn, "select id from things where attributes match 'a'"), Vec::<i64>::new());
    assert_eq!(ids(&conn, "select id from things where attributes match 'b'"), vec![x]);
    assert_eq!(count(&conn, "select count(*) from things_Attributes where name = 'a'"), 0);
}

#[test]
fn scenario_d_delete_removes_everywhere() {
    let conn = setup();
    let x = insert(&conn, &encode([("a", "1"), ("b", "2")]));
    let y = insert(&conn, &encode([("a", "3")]));
    conn.execute("delete from things where id = ?1", [x]).unwrap();
    assert_eq!(ids(&conn, "select id from things"), vec![y]);
    assert_eq!(ids(&conn, "select id from things where attributes match 'a'"), vec![y]);
    assert_eq!(ids(&conn, "select id from things where attributes match 'b'"), Vec::<i64>::new());
    assert_eq!(
        count(&conn, &format!("select count(*) from things_Attributes where entity_id = {x}")),
        0
    );
}

#[test]
fn match_is_answered_through_the_attribute_index() {
    let conn = setup();
    let detail: String = conn
        .query_row(
            "explain query plan select id from things where attributes match 'color'",
            [],
            |r| r.get(3),
        )
        .unwrap();
    assert!(detail.contains("INDEX 1"), "{detail}");
    let detail: String = conn
        .query_row("explain query plan select id from things", [], |r| r.get(3))
        .unwrap();
    assert!(detail.contains("INDEX 0"), "{detail}");
}

#[test]
fn second_match_is_checked_by_the_match_function() {
    let conn = setup();
    let small_red = insert(&conn, &encode([("color", "red"), ("size", "S")]));
    insert(&conn, &encode([("color", "red"), ("size", "M")]));
    insert(&conn, &encode([("size", "S")]));
    assert_eq!(
        ids(
            &conn,
            "select id from things where attributes match 'color' and attributes match ('size' || char(31) || 'S')"
        ),
        vec![small_red]
    );
}

fn ids_for(conn: &Connection, sql: &str, query: &str) -> Vec<i64> {
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt.query_map([query], |r| r.get(0)).unwrap();
    let mut ids = rows.collect::<rusqlite::Result<Vec<i64>>>().unwrap();
    ids.sort();
    ids
}

#[test]
fn index_join_and_match_function_agree() {
    const ALPHABET: [&str; 4] = ["", "a", "b", "ab"];
    let conn = Connection::open_in_memory().unwrap();
    let settings = Settings {
        batch_size: 2,
        ..Settings::default()
    };
    sqlattr::register(&conn, &settings).unwrap();
    conn.execute_batch("create virtual table things using attributes")
        .unwrap();

    // names are distinct within a blob, values often spell other names
    let mut seed: u64 = 0x5eed;
    let mut next = |bound: usize| {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((seed >> 33) as usize) % bound
    };
    for _ in 0..60 {
        let mut names = ALPHABET.to_vec();
        let width = next(names.len() + 1);
        let mut pairs = Vec::new();
        for _ in 0..width {
            let name = names.remove(next(names.len()));
            pairs.push((name, ALPHABET[next(ALPHABET.len())]));
        }
        insert(&conn, &encode(pairs));
    }

    let indexed = "select id from things where attributes match ?1";
    let residual = "select id from things where (attributes || '') match ?1";
    let projected = "select id from things where has_attr(attributes, ?1)";
    let detail: String = conn
        .query_row(&format!("explain query plan {residual}"), ["a"], |r| r.get(3))
        .unwrap();
    assert!(detail.contains("INDEX 0"), "{detail}");

    let mut queries: Vec<String> = ALPHABET.iter().map(|n| n.to_string()).collect();
    queries.push("c".to_owned());
    for name in ALPHABET.iter().chain(["c"].iter()) {
        for value in ALPHABET {
            queries.push(format!("{name}{SEPARATOR_CHAR}{value}"));
        }
    }
    for query in &queries {
        let expected = ids_for(&conn, indexed, query);
        assert_eq!(ids_for(&conn, residual, query), expected, "{query:?}");
        assert_eq!(ids_for(&conn, projected, query), expected, "{query:?}");
    }
    // the generated data reaches both outcomes
    assert!(!ids_for(&conn, indexed, "").is_empty());
    assert!(ids_for(&conn, indexed, "c").is_empty());
}

#[test]
fn deleted_rowids_must_be_integers() {
    assert_eq!(identity_arg(ValueRef::Integer(7)).unwrap(), 7);
    let text = Value::Text("seven".to_owned());
    match identity_arg(ValueRef::from(&text)) {
        Err(rusqlite::Error::FromSqlConversionFailure(_, found, _)) => {
            assert_eq!(found, Type::Text)
        }
        other => panic!("expected a conversion failure, got {other:?}"),
    }
}

#[test]
fn identities_can_be_supplied() {
    let conn = setup();
    conn.execute(
        "insert into things (id, attributes) values (42, pack_attrs('a', '1'))",
        [],
    )
    .unwrap();
    assert_eq!(conn.last_insert_rowid(), 42);
    conn.execute(
        "insert into things (rowid, attributes) values (7, pack_attrs('a', '2'))",
        [],
    )
    .unwrap();
    assert_eq!(ids(&conn, "select rowid from things"), vec![7, 42]);
    assert_eq!(ids(&conn, "select id from things where attributes match 'a'"), vec![7, 42]);
    let err = conn
        .execute(
            "insert into things (rowid, id, attributes) values (1, 2, '')",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("disagree"), "{err}");
}

#[test]
fn update_can_change_the_identity() {
    let conn = setup();
    let x = insert(&conn, &encode([("a", "1")]));
    conn.execute("update things set id = 500 where id = ?1", [x])
        .unwrap();
    assert_eq!(ids(&conn, "select id from things"), vec![500]);
    assert_eq!(ids(&conn, "select id from things where attributes match 'a'"), vec![500]);
}

#[test]
fn engine_assigned_identities() {
    let conn = setup();
    conn.execute_batch("create virtual table sealed using attributes(identity=engine)")
        .unwrap();
    let err = conn
        .execute(
            "insert into sealed (id, attributes) values (42, pack_attrs('a', '1'))",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("Policy violation"), "{err}");
    conn.execute("insert into sealed (attributes) values (pack_attrs('a', '1'))", [])
        .unwrap();
    assert_eq!(count(&conn, "select count(*) from sealed"), 1);
}

#[test]
fn append_only_tables() {
    let conn = setup();
    conn.execute_batch("create virtual table journal using attributes(append_only=true)")
        .unwrap();
    conn.execute("insert into journal (attributes) values (pack_attrs('a', '1'))", [])
        .unwrap();
    let err = conn.execute("delete from journal", []).unwrap_err();
    assert!(err.to_string().contains("append-only"), "{err}");
    let err = conn
        .execute("update journal set attributes = ''", [])
        .unwrap_err();
    assert!(err.to_string().contains("append-only"), "{err}");
    assert_eq!(count(&conn, "select count(*) from journal"), 1);
}

#[test]
fn shape_is_fixed_whatever_the_declaration() {
    let conn = setup();
    conn.execute_batch("create virtual table wide using attributes(color text, size integer)")
        .unwrap();
    let stmt = conn.prepare("select * from wide").unwrap();
    assert_eq!(stmt.column_names(), vec!["id", "attributes"]);
}

#[test]
fn bad_options_leave_nothing_behind() {
    let conn = setup();
    let err = conn
        .execute_batch("create virtual table broken using attributes(identity=nobody)")
        .unwrap_err();
    assert!(err.to_string().contains("identity"), "{err}");
    assert_eq!(
        count(&conn, "select count(*) from sqlite_master where name like 'broken%'"),
        0
    );
}

#[test]
fn null_attributes_are_stored_empty() {
    let conn = setup();
    conn.execute("insert into things (attributes) values (null)", [])
        .unwrap();
    let attributes: String = conn
        .query_row("select attributes from things", [], |r| r.get(0))
        .unwrap();
    assert_eq!(attributes, "");
}

#[test]
fn duplicate_names_fail_and_roll_back() {
    let conn = setup();
    conn.execute_batch("begin").unwrap();
    insert(&conn, &encode([("a", "1")]));
    let err = conn
        .execute(
            "insert into things (attributes) values (?1)",
            [encode([("a", "1"), ("a", "2")])],
        )
        .unwrap_err();
    assert!(err.to_string().contains("UNIQUE"), "{err}");
    conn.execute_batch("rollback").unwrap();
    assert_eq!(count(&conn, "select count(*) from things_Sequence"), 0);
    assert_eq!(count(&conn, "select count(*) from things_Attributes"), 0);
}

#[test]
fn self_join_uses_independent_cursors() {
    let conn = setup();
    let a = insert(&conn, &encode([("kind", "x")]));
    let b = insert(&conn, &encode([("kind", "y")]));
    let mut stmt = conn
        .prepare(
            "select l.id, r.id from things l, things r
                where l.attributes match 'kind' and r.attributes match ('kind' || char(31) || 'y')
                order by l.id",
        )
        .unwrap();
    let pairs = stmt
        .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(pairs, vec![(a, b), (b, b)]);
}

#[test]
fn many_rows_stream_in_batches() {
    let conn = Connection::open_in_memory().unwrap();
    let settings = Settings {
        batch_size: 3,
        ..Settings::default()
    };
    sqlattr::register(&conn, &settings).unwrap();
    conn.execute_batch("create virtual table things using attributes")
        .unwrap();
    for i in 0..20 {
        conn.execute(
            "insert into things (attributes) values (pack_attrs('n', ?1, 'even', ?2))",
            params![i.to_string(), (i % 2 == 0).to_string()],
        )
        .unwrap();
    }
    assert_eq!(count(&conn, "select count(*) from things"), 20);
    assert_eq!(
        count(&conn, "select count(*) from things where attributes match ('even' || char(31) || 'true')"),
        10
    );
    // rewriting every row while scanning visits each entity once
    conn.execute("update things set attributes = attributes || char(31) || 'seen' || char(31) || '1'", [])
        .unwrap();
    assert_eq!(count(&conn, "select count(*) from things where attributes match 'seen'"), 20);
}

#[test]
fn tables_survive_reconnects_and_drop_cleanly() {
    let path = std::env::temp_dir().join(format!("sqlattr-reopen-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    {
        let conn = Connection::open(&path).unwrap();
        sqlattr::register(&conn, &Settings::default()).unwrap();
        conn.execute_batch("create virtual table things using attributes(identity=engine)")
            .unwrap();
        conn.execute(
            "insert into things (attributes) values (pack_attrs('color', 'red'))",
            [],
        )
        .unwrap();
    }
    let conn = Connection::open(&path).unwrap();
    sqlattr::register(&conn, &Settings::default()).unwrap();
    let color: String = conn
        .query_row(
            "select get_attr(attributes, 'color') from things where attributes match 'color'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(color, "red");
    // the per-table policy comes back with the table
    assert!(conn
        .execute("insert into things (id, attributes) values (9, '')", [])
        .is_err());
    conn.execute_batch("drop table things").unwrap();
    assert_eq!(
        count(&conn, "select count(*) from sqlite_master where name like 'things%'"),
        0
    );
    drop(conn);
    let _ = std::fs::remove_file(&path);
}

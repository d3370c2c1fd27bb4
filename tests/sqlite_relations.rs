#![cfg(feature = "sqlite")]
#[macro_use]
mod common;

use netabase_relations::databases::sqlite_store::SqliteStore;

backend_scenarios!(SqliteStore::in_memory().unwrap());

#[test]
fn link_is_one_row_per_direction_on_disk() {
    use netabase_relations::prelude::*;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relations.sqlite");
    let r = common::relations(SqliteStore::new(&path).unwrap());
    let a = common::device(&r, "a");
    let g = common::group(&r, "core");
    r.to_many(&a, "groups").unwrap().add_relation(&g).unwrap();
    drop(r);

    let conn = rusqlite::Connection::open(&path).unwrap();
    let mut stmt = conn
        .prepare("SELECT uid, name, remote_uid FROM relations ORDER BY uid")
        .unwrap();
    let rows: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        rows,
        vec![
            ("/Devices/a".to_string(), "groups".to_string(), "/Groups/core".to_string()),
            ("/Groups/core".to_string(), "devices".to_string(), "/Devices/a".to_string()),
        ]
    );
}

// crates/db-relay-store-sqlite/tests/common/mod.rs
// ============================================================================
// Module: SQLite Engine Test Fixtures
// Description: Builds a scratch database matching the schema registry.
// Purpose: Give engine tests a realistic file to open.
// ============================================================================

#![allow(dead_code, reason = "Not every test binary uses every fixture.")]

use std::path::PathBuf;

use db_relay_core::SchemaRegistry;
use db_relay_store_sqlite::SqliteEngine;
use db_relay_store_sqlite::SqliteEngineConfig;
use rusqlite::Connection;
use tempfile::TempDir;

/// Scratch database that lives as long as the guard.
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
}

/// Returns the column definition for tables that need keys.
fn column_ddl(table: &str, column: &str) -> String {
    match (table, column) {
        ("UserData", "Baid") => "\"Baid\" INTEGER PRIMARY KEY".to_string(),
        ("Card", "AccessCode") => "\"AccessCode\" TEXT PRIMARY KEY".to_string(),
        ("SongPlayData", "Id") => "\"Id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        _ => format!("\"{column}\""),
    }
}

/// Creates every registry table (except `sqlite_sequence`) plus seed rows.
pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taiko.db3");
    let connection = Connection::open(&path).unwrap();
    for table in SchemaRegistry::builtin().tables() {
        if table.name == "sqlite_sequence" {
            continue;
        }
        let columns: Vec<String> =
            table.columns.iter().map(|column| column_ddl(table.name, column)).collect();
        connection
            .execute_batch(&format!("CREATE TABLE \"{}\" ({});", table.name, columns.join(", ")))
            .unwrap();
    }
    connection
        .execute_batch(
            "INSERT INTO UserData (Baid, MyDonName, Title) VALUES (17, 'don', 'champ');
             INSERT INTO UserData (Baid, MyDonName, Title) VALUES (18, 'katsu', NULL);
             INSERT INTO Card (AccessCode, Baid) VALUES ('code-b', 17);
             INSERT INTO Card (AccessCode, Baid) VALUES ('code-a', 17);
             INSERT INTO Card (AccessCode, Baid) VALUES ('code-c', 18);
             INSERT INTO SongBestData (Baid, SongId, Difficulty, BestScore) VALUES (17, 1, 3, 900000);
             INSERT INTO SongBestData (Baid, SongId, Difficulty, BestScore) VALUES (17, 2, 4, 950000);
             INSERT INTO SongBestData (Baid, SongId, Difficulty, BestScore) VALUES (17, 3, 4, 800000);
             INSERT INTO SongBestData (Baid, SongId, Difficulty, BestScore) VALUES (18, 1, 2, 500000);",
        )
        .unwrap();
    Fixture {
        dir,
        path,
    }
}

/// Opens an engine over the fixture database.
pub fn engine(fixture: &Fixture, allow_write: bool) -> SqliteEngine {
    let config = SqliteEngineConfig {
        allow_write,
        ..SqliteEngineConfig::new(&fixture.path)
    };
    SqliteEngine::open(config, SchemaRegistry::builtin()).unwrap()
}

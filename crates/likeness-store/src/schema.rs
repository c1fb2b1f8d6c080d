use rusqlite::Connection;

/// Applied on every open; every statement is idempotent.
///
/// `committed` stays 0 while a person is being enrolled. Only committed
/// persons are trained on or named.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL CHECK (length(trim(name)) > 0),
    note        TEXT,
    created_at  TEXT NOT NULL,
    committed   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS samples (
    person_id   INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
    sequence    INTEGER NOT NULL,
    size        INTEGER NOT NULL,
    image       BLOB NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (person_id, sequence)
);
";

/// Create the schema and bring databases from before the `committed`
/// column up to date.
///
/// Rows that predate the column were written by finished enrollments, so
/// they are marked committed.
pub(crate) fn apply(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;

    let has_committed: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('persons') WHERE name = 'committed'",
        [],
        |row| row.get(0),
    )?;
    if !has_committed {
        let tx = conn.transaction()?;
        tx.execute_batch(
            "ALTER TABLE persons ADD COLUMN committed INTEGER NOT NULL DEFAULT 0;
             UPDATE persons SET committed = 1;",
        )?;
        tx.commit()?;
        tracing::info!("added committed column to persons");
    }
    Ok(())
}

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        // No foreign key from feeds to users: orphans stay visible to the
        // scheduler, which reports them.
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      TEXT PRIMARY KEY,
                address                 BLOB NOT NULL,
                email                   TEXT NOT NULL,
                email_verified          INTEGER NOT NULL DEFAULT 0,
                verification_token      BLOB NOT NULL,
                email_verification_last TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE UNIQUE INDEX preexisting_email_lookup ON users(email);
            CREATE UNIQUE INDEX address_based_lookup ON users(address);

            CREATE TABLE feeds (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL,
                name            TEXT NOT NULL DEFAULT '',
                url             TEXT NOT NULL,
                frequency_secs  INTEGER NOT NULL,
                last_fetched    TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_feeds_owner ON feeds(owner_id, created_at);

            CREATE TABLE seen_items (
                id          TEXT PRIMARY KEY,
                feed_id     TEXT NOT NULL,
                guid        TEXT NOT NULL,
                timestamp   TEXT NOT NULL
            );

            CREATE UNIQUE INDEX already_notified_lookup ON seen_items(feed_id, guid);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

//! Database migrations using cetane.
//!
//! Runs migrations via blocking tasks to work with async connections.

use tracing::info;

use super::pool::DbError;

/// Run pending migrations for a database URL, applying them in dependency order.
pub async fn run_migrations(database_url: &str) -> Result<(), DbError> {
    if super::util::is_postgres_url(database_url) {
        #[cfg(feature = "postgres")]
        {
            run_postgres_migrations_async(database_url).await
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(migration_error(
                "PostgreSQL support not compiled. Use --features postgres",
            ))
        }
    } else {
        run_sqlite_migrations_async(database_url).await
    }
}

fn migration_error(msg: impl std::fmt::Display) -> DbError {
    DbError::QueryBuilderError(msg.to_string().into())
}

async fn run_sqlite_migrations_async(database_url: &str) -> Result<(), DbError> {
    use cetane::backend::Sqlite;
    use cetane::migrator::Migrator;

    let url = database_url
        .strip_prefix("sqlite:")
        .unwrap_or(database_url)
        .to_string();

    tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&url).map_err(migration_error)?;
        let backend = Sqlite;
        let registry = crate::migrations::registry();
        let state = SqliteState::new(&conn)?;

        let mut migrator = Migrator::new(&registry, &backend, state);
        let applied = migrator
            .migrate_forward(|sql| conn.execute_batch(sql).map_err(|e| e.to_string()))
            .map_err(migration_error)?;

        for name in &applied {
            info!("Applied migration: {}", name);
        }
        if applied.is_empty() {
            info!("No pending migrations");
        }
        Ok(())
    })
    .await
    .map_err(|e| DbError::QueryBuilderError(Box::new(e)))?
}

/// Roll back the most recently applied migration.
pub async fn rollback_last(database_url: &str) -> Result<Option<String>, DbError> {
    if super::util::is_postgres_url(database_url) {
        #[cfg(feature = "postgres")]
        {
            return rollback_last_postgres(database_url).await;
        }
        #[cfg(not(feature = "postgres"))]
        return Err(migration_error(
            "PostgreSQL support not compiled. Use --features postgres",
        ));
    }

    let url = database_url
        .strip_prefix("sqlite:")
        .unwrap_or(database_url)
        .to_string();

    tokio::task::spawn_blocking(move || {
        use cetane::backend::Sqlite;
        use cetane::migrator::Migrator;

        let conn = rusqlite::Connection::open(&url).map_err(migration_error)?;
        let backend = Sqlite;
        let registry = crate::migrations::registry();
        let state = SqliteState::new(&conn)?;

        let mut migrator = Migrator::new(&registry, &backend, state);
        migrator
            .migrate_backward(1, |sql| conn.execute_batch(sql).map_err(|e| e.to_string()))
            .map_err(migration_error)
    })
    .await
    .map_err(|e| DbError::QueryBuilderError(Box::new(e)))?
}

#[cfg(feature = "postgres")]
async fn run_postgres_migrations_async(database_url: &str) -> Result<(), DbError> {
    use cetane::backend::Postgres;
    use cetane::migrator::Migrator;

    let (client, connection) = tokio_postgres::connect(database_url, tokio_postgres::NoTls)
        .await
        .map_err(migration_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("postgres migration connection error: {}", e);
        }
    });

    let backend = Postgres;
    let registry = crate::migrations::registry();
    let state = PostgresState::new(&client).await?;

    let mut migrator = Migrator::new(&registry, &backend, state);
    let applied = migrator
        .migrate_forward(|sql| {
            let rt = tokio::runtime::Handle::current();
            std::thread::scope(|s| {
                s.spawn(|| {
                    rt.block_on(async {
                        client.batch_execute(sql).await.map_err(|e| e.to_string())
                    })
                })
                .join()
                .map_err(|_| "thread panicked".to_string())?
            })
        })
        .map_err(migration_error)?;

    for name in &applied {
        info!("Applied migration: {}", name);
    }
    if applied.is_empty() {
        info!("No pending migrations");
    }
    Ok(())
}

#[cfg(feature = "postgres")]
async fn rollback_last_postgres(database_url: &str) -> Result<Option<String>, DbError> {
    use cetane::backend::Postgres;
    use cetane::migrator::Migrator;

    let (client, connection) = tokio_postgres::connect(database_url, tokio_postgres::NoTls)
        .await
        .map_err(migration_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("postgres migration connection error: {}", e);
        }
    });

    let backend = Postgres;
    let registry = crate::migrations::registry();
    let state = PostgresState::new(&client).await?;

    let mut migrator = Migrator::new(&registry, &backend, state);
    migrator
        .migrate_backward(1, |sql| {
            let rt = tokio::runtime::Handle::current();
            std::thread::scope(|s| {
                s.spawn(|| {
                    rt.block_on(async {
                        client.batch_execute(sql).await.map_err(|e| e.to_string())
                    })
                })
                .join()
                .map_err(|_| "thread panicked".to_string())?
            })
        })
        .map_err(migration_error)
}

// -- SQLite state store --

struct SqliteState<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteState<'a> {
    fn new(conn: &'a rusqlite::Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .map_err(migration_error)?;
        Ok(Self { conn })
    }
}

impl cetane::migrator::MigrationStateStore for SqliteState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __cetane_migrations ORDER BY name")
            .map_err(|e| e.to_string())?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(names)
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO __cetane_migrations (name) VALUES (?1)",
                [name],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM __cetane_migrations WHERE name = ?1", [name])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

// -- PostgreSQL state store --

#[cfg(feature = "postgres")]
struct PostgresState<'a> {
    client: &'a tokio_postgres::Client,
    applied: Vec<String>,
}

#[cfg(feature = "postgres")]
impl<'a> PostgresState<'a> {
    async fn new(client: &'a tokio_postgres::Client) -> Result<Self, DbError> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                    name TEXT PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .await
            .map_err(migration_error)?;

        let rows = client
            .query("SELECT name FROM __cetane_migrations ORDER BY name", &[])
            .await
            .map_err(migration_error)?;
        let applied = rows.iter().map(|r| r.get::<_, String>(0)).collect();
        Ok(Self { client, applied })
    }
}

#[cfg(feature = "postgres")]
impl cetane::migrator::MigrationStateStore for PostgresState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        Ok(self.applied.clone())
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        let rt = tokio::runtime::Handle::current();
        std::thread::scope(|s| {
            s.spawn(|| {
                rt.block_on(async {
                    self.client
                        .execute(
                            "INSERT INTO __cetane_migrations (name) VALUES ($1) ON CONFLICT DO NOTHING",
                            &[&name],
                        )
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok::<(), String>(())
                })
            })
            .join()
            .map_err(|_| "thread panicked".to_string())?
        })?;

        if !self.applied.contains(&name.to_string()) {
            self.applied.push(name.to_string());
        }
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        let rt = tokio::runtime::Handle::current();
        std::thread::scope(|s| {
            s.spawn(|| {
                rt.block_on(async {
                    self.client
                        .execute("DELETE FROM __cetane_migrations WHERE name = $1", &[&name])
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok::<(), String>(())
                })
            })
            .join()
            .map_err(|_| "thread panicked".to_string())?
        })?;

        self.applied.retain(|n| n != name);
        Ok(())
    }
}

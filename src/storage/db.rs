use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement};
use sea_orm_migration::SchemaManager;

/// Schema files applied in order, keyed by the version recorded in `seaql_migrations`.
const MIGRATIONS: [(&str, &str); 2] = [
    (
        "001_create_conversations",
        include_str!("../../migrations/001_create_conversations.sql"),
    ),
    (
        "002_create_messages",
        include_str!("../../migrations/002_create_messages.sql"),
    ),
];

pub async fn init_db(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    tracing::info!("Connecting to database: {}", database_url);

    // Handle special SQLite URL formats
    let db = if database_url == "sqlite::memory:" {
        Database::connect(database_url)
            .await
            .map_err(|e| DbErr::Custom(format!("Connection failed: {}", e)))?
    } else if let Some(path_str) = database_url.strip_prefix("sqlite://") {
        let path_str = path_str.split('?').next().unwrap_or(path_str);
        let path = std::path::Path::new(path_str);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbErr::Custom(format!("Failed to create DB directory: {}", e)))?;
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        if !path.exists() {
            std::fs::File::create(path)
                .map_err(|e| DbErr::Custom(format!("Failed to create DB file: {}", e)))?;
            tracing::info!("Created database file: {}", path.display());
        }

        Database::connect(database_url)
            .await
            .map_err(|e| DbErr::Custom(format!("Connection failed: {}", e)))?
    } else {
        return Err(DbErr::Custom("Invalid SQLite URL format".to_string()));
    };

    apply_migrations(&db).await?;

    Ok(db)
}

async fn apply_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    let schema_manager = SchemaManager::new(db);
    if !schema_manager.has_table("seaql_migrations").await? {
        tracing::info!("First run: creating migration tracking table");
        db.execute_unprepared(
            r#"
            CREATE TABLE IF NOT EXISTS seaql_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .await?;
    }

    for (version, sql) in MIGRATIONS {
        let applied = db
            .query_one(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "SELECT version FROM seaql_migrations WHERE version = ?",
                [version.into()],
            ))
            .await?
            .is_some();
        if applied {
            continue;
        }

        db.execute_unprepared(sql).await?;
        db.execute(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            "INSERT INTO seaql_migrations (version) VALUES (?)",
            [version.into()],
        ))
        .await?;
        tracing::info!("Applied migration {}", version);
    }

    Ok(())
}

//! Primary database: connection pool and schema
//!
//! Entity tables are created on startup if they are missing. Policy tables
//! are not listed here; each adapter creates its own on first use.

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use tracing::{debug, info};

use crate::config::{DatabaseConfig, DatabaseKind};
use crate::entity::{casbin_adapter, casbin_model, enforcer, group, permission, user, user_group};

/// Connect to the primary database and bring its schema up to date
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    match config.kind {
        DatabaseKind::Sqlite => {
            info!("Opening sqlite database: {}", config.path.display());
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbErr::Custom(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        kind => info!(
            "Connecting to {} database: {}:{}/{}",
            kind, config.host, config.port, config.name
        ),
    }

    let mut opt = ConnectOptions::new(config.connection_url());
    opt.max_connections(config.max_connections.max(1))
        .connect_timeout(config.connect_timeout())
        .acquire_timeout(config.connect_timeout())
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug);
    if config.kind == DatabaseKind::Postgres {
        opt.set_schema_search_path("public");
    }

    let db = Database::connect(opt).await?;
    info!("Database connection established");

    auto_migrate(&db).await?;
    Ok(db)
}

/// Create every entity table that does not exist yet
pub async fn auto_migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    info!("Running auto-migration for all entities...");

    // Configuration records first, then what points at them
    ensure_table(db, casbin_model::Entity).await?;
    ensure_table(db, casbin_adapter::Entity).await?;
    ensure_table(db, enforcer::Entity).await?;
    ensure_table(db, permission::Entity).await?;

    ensure_table(db, group::Entity).await?;
    ensure_table(db, user::Entity).await?;
    ensure_table(db, user_group::Entity).await?;

    info!("Auto-migration completed successfully");
    Ok(())
}

async fn ensure_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let mut stmt = Schema::new(backend).create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    debug!(table = entity.table_name(), "table ready");
    Ok(())
}

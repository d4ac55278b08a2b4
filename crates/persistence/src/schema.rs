//! ScyllaDB schema creation
//!
//! All timestamps are epoch milliseconds in BIGINT columns. Nested
//! state (dialogue cursors, checklists, task payloads) rides in `_json`
//! TEXT columns next to the scalar fields queries actually touch.

use crate::error::PersistenceError;
use scylla::Session;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // Leads, one row per phone
    let leads_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.leads (
            phone TEXT,
            id UUID,
            name TEXT,
            status TEXT,
            score INT,
            category TEXT,
            assigned_staff_id UUID,
            flow_json TEXT,
            profile_json TEXT,
            source TEXT,
            created_at BIGINT,
            updated_at BIGINT,
            PRIMARY KEY (phone)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(leads_table, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create leads table: {}", e)))?;

    // Team members; the roster is small and always read whole
    let team_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.team_members (
            id UUID,
            name TEXT,
            phone TEXT,
            role TEXT,
            active BOOLEAN,
            banks_json TEXT,
            vacations_json TEXT,
            pending_action_json TEXT,
            created_at BIGINT,
            PRIMARY KEY (id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(team_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create team_members table: {}", e))
        })?;

    // Conversation turns, newest first, expired after 90 days
    let history_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.conversation_history (
            phone TEXT,
            created_at BIGINT,
            id UUID,
            role TEXT,
            text TEXT,
            PRIMARY KEY ((phone), created_at, id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, id DESC)
        AND default_time_to_live = 7776000
    "#,
        keyspace
    );

    session
        .query_unpaged(history_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!(
                "Failed to create conversation_history table: {}",
                e
            ))
        })?;

    // Appointments partitioned by lead phone
    let appointments_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.appointments (
            lead_phone TEXT,
            id UUID,
            lead_id UUID,
            lead_name TEXT,
            property TEXT,
            date TEXT,
            time TEXT,
            status TEXT,
            kind TEXT,
            staff_id UUID,
            calendar_event_id TEXT,
            created_at BIGINT,
            PRIMARY KEY ((lead_phone), id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(appointments_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create appointments table: {}", e))
        })?;

    // Credit applications partitioned by lead
    let credit_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.credit_applications (
            lead_id UUID,
            id UUID,
            advisor_id UUID,
            bank TEXT,
            monthly_income BIGINT,
            down_payment BIGINT,
            requested_amount BIGINT,
            status TEXT,
            created_at BIGINT,
            updated_at BIGINT,
            PRIMARY KEY ((lead_id), id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(credit_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!(
                "Failed to create credit_applications table: {}",
                e
            ))
        })?;

    // Outbound task queue; finished rows expire after a week
    let outbox_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.outbox_tasks (
            id UUID,
            kind TEXT,
            payload_json TEXT,
            status TEXT,
            attempts INT,
            run_at BIGINT,
            last_error TEXT,
            created_at BIGINT,
            updated_at BIGINT,
            PRIMARY KEY (id)
        ) WITH default_time_to_live = 604800
    "#,
        keyspace
    );

    session
        .query_unpaged(outbox_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create outbox_tasks table: {}", e))
        })?;

    tracing::info!("All tables created successfully");
    Ok(())
}

//! libSQL backend — async `Database` trait implementation.
//!
//! Local file or in-memory databases; the in-memory constructor backs the
//! test suites. Timestamps are stored as RFC 3339 text; structured lead
//! attributes and event payloads as JSON text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::cadence::CadenceEnrollment;
use crate::error::DatabaseError;
use crate::leads::{Lead, LeadAttributes, ProfileSource};
use crate::limits::breaker::{CircuitKey, CircuitState, ProviderCircuit};
use crate::signals::event::{SignalEvent, SignalKind};
use crate::signals::state::LeadStatus;
use crate::store::migrations;
use crate::store::traits::{AuditKind, AuditRecord, Database};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn db_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid '{s}': {e}")))
}

const LEAD_COLUMNS: &str =
    "id, address, profile_handle, attributes, status, last_activity_at, created_at, updated_at";

fn row_to_lead(row: &libsql::Row) -> Result<Lead, DatabaseError> {
    let id_str: String = row.get(0).map_err(db_err)?;
    let address: String = row.get(1).map_err(db_err)?;
    let profile_handle: Option<String> = row.get(2).map_err(db_err)?;
    let attributes_json: String = row.get(3).map_err(db_err)?;
    let status_str: String = row.get(4).map_err(db_err)?;
    let last_activity: String = row.get(5).map_err(db_err)?;
    let created: String = row.get(6).map_err(db_err)?;
    let updated: String = row.get(7).map_err(db_err)?;

    let attributes: LeadAttributes = serde_json::from_str(&attributes_json)
        .map_err(|e| DatabaseError::Serialization(format!("lead attributes: {e}")))?;

    Ok(Lead {
        id: parse_uuid(&id_str)?,
        address,
        profile_handle,
        attributes,
        status: LeadStatus::parse(&status_str).unwrap_or(LeadStatus::Pending),
        last_activity_at: parse_datetime(&last_activity),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const EVENT_COLUMNS: &str =
    "provider_event_id, lead_id, kind, provider, occurred_at, payload";

fn row_to_event(row: &libsql::Row) -> Result<SignalEvent, DatabaseError> {
    let provider_event_id: String = row.get(0).map_err(db_err)?;
    let lead_id: String = row.get(1).map_err(db_err)?;
    let kind_str: String = row.get(2).map_err(db_err)?;
    let provider: String = row.get(3).map_err(db_err)?;
    let occurred: String = row.get(4).map_err(db_err)?;
    let payload: Option<String> = row.get(5).map_err(db_err)?;

    let kind = SignalKind::parse(&kind_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("unknown event kind '{kind_str}'")))?;

    Ok(SignalEvent {
        lead_id: parse_uuid(&lead_id)?,
        kind,
        provider_event_id,
        provider,
        occurred_at: parse_datetime(&occurred),
        payload: payload
            .and_then(|p| serde_json::from_str(&p).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

const ENROLLMENT_COLUMNS: &str =
    "id, lead_id, cadence_id, step_index, due_at, enrolled_at, active, exit_reason";

fn row_to_enrollment(row: &libsql::Row) -> Result<CadenceEnrollment, DatabaseError> {
    let id: String = row.get(0).map_err(db_err)?;
    let lead_id: String = row.get(1).map_err(db_err)?;
    let cadence_id: String = row.get(2).map_err(db_err)?;
    let step_index: i64 = row.get(3).map_err(db_err)?;
    let due_at: String = row.get(4).map_err(db_err)?;
    let enrolled_at: String = row.get(5).map_err(db_err)?;
    let active: i64 = row.get(6).map_err(db_err)?;
    let exit_reason: Option<String> = row.get(7).map_err(db_err)?;

    Ok(CadenceEnrollment {
        id: parse_uuid(&id)?,
        lead_id: parse_uuid(&lead_id)?,
        cadence_id,
        step_index: step_index.max(0) as u32,
        due_at: parse_datetime(&due_at),
        enrolled_at: parse_datetime(&enrolled_at),
        active: active != 0,
        exit_reason,
    })
}

fn row_to_circuit(row: &libsql::Row) -> Result<ProviderCircuit, DatabaseError> {
    let provider: String = row.get(1).map_err(db_err)?;
    let domain: Option<String> = row.get(2).map_err(db_err)?;
    let state_str: String = row.get(3).map_err(db_err)?;
    let failures: i64 = row.get(4).map_err(db_err)?;
    let last_transition: String = row.get(5).map_err(db_err)?;
    let probe: i64 = row.get(6).map_err(db_err)?;

    Ok(ProviderCircuit {
        key: CircuitKey { provider, domain },
        state: CircuitState::parse(&state_str).unwrap_or(CircuitState::Closed),
        consecutive_failures: failures.max(0) as u32,
        last_transition: parse_datetime(&last_transition),
        probe_in_flight: probe != 0,
    })
}

fn row_to_audit(row: &libsql::Row) -> Result<AuditRecord, DatabaseError> {
    let id: String = row.get(0).map_err(db_err)?;
    let at: String = row.get(1).map_err(db_err)?;
    let kind_str: String = row.get(2).map_err(db_err)?;
    let lead_id: Option<String> = row.get(3).map_err(db_err)?;
    let rule: String = row.get(4).map_err(db_err)?;
    let detail: String = row.get(5).map_err(db_err)?;

    Ok(AuditRecord {
        id: parse_uuid(&id)?,
        at: parse_datetime(&at),
        kind: AuditKind::parse(&kind_str).unwrap_or(AuditKind::GuardRejection),
        lead_id: lead_id.map(|s| parse_uuid(&s)).transpose()?,
        rule,
        detail,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
        let attributes = serde_json::to_string(&lead.attributes)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                &format!("INSERT INTO leads ({LEAD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    lead.id.to_string(),
                    lead.address.clone(),
                    lead.profile_handle.clone(),
                    attributes,
                    lead.status.as_str(),
                    lead.last_activity_at.to_rfc3339(),
                    lead.created_at.to_rfc3339(),
                    lead.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_lead(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_lead_status(
        &self,
        id: Uuid,
        status: LeadStatus,
        last_activity_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE leads SET status = ?2, last_activity_at = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    id.to_string(),
                    status.as_str(),
                    last_activity_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "lead".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_leads_with_status(
        &self,
        statuses: &[LeadStatus],
    ) -> Result<Vec<Lead>, DatabaseError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> =
            (1..=statuses.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE status IN ({})",
            placeholders.join(", ")
        );
        let values: Vec<libsql::Value> = statuses
            .iter()
            .map(|s| libsql::Value::from(s.as_str()))
            .collect();

        let mut rows = self.conn().query(&sql, values).await.map_err(db_err)?;
        let mut leads = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            leads.push(row_to_lead(&row)?);
        }
        Ok(leads)
    }

    async fn insert_signal_event(&self, event: &SignalEvent) -> Result<bool, DatabaseError> {
        let payload = if event.payload.is_null() {
            None
        } else {
            Some(
                serde_json::to_string(&event.payload)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            )
        };
        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO signal_events ({EVENT_COLUMNS}, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    event.provider_event_id.clone(),
                    event.lead_id.to_string(),
                    event.kind.as_str(),
                    event.provider.clone(),
                    event.occurred_at.to_rfc3339(),
                    payload,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(inserted == 1)
    }

    async fn count_signal_events(
        &self,
        lead_id: Uuid,
        kind: SignalKind,
    ) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM signal_events WHERE lead_id = ?1 AND kind = ?2",
                params![lead_id.to_string(), kind.as_str()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(db_err)?;
                Ok(count.max(0) as u32)
            }
            None => Ok(0),
        }
    }

    async fn list_signal_events(&self, lead_id: Uuid) -> Result<Vec<SignalEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM signal_events \
                     WHERE lead_id = ?1 ORDER BY occurred_at ASC"
                ),
                params![lead_id.to_string()],
            )
            .await
            .map_err(db_err)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    async fn insert_enrollment(
        &self,
        enrollment: &CadenceEnrollment,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO enrollments ({ENROLLMENT_COLUMNS}, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    enrollment.id.to_string(),
                    enrollment.lead_id.to_string(),
                    enrollment.cadence_id.clone(),
                    enrollment.step_index as i64,
                    enrollment.due_at.to_rfc3339(),
                    enrollment.enrolled_at.to_rfc3339(),
                    enrollment.active as i64,
                    enrollment.exit_reason.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    DatabaseError::Constraint(format!(
                        "lead {} already active in cadence {}",
                        enrollment.lead_id, enrollment.cadence_id
                    ))
                } else {
                    DatabaseError::Query(msg)
                }
            })?;
        Ok(())
    }

    async fn get_enrollment(&self, id: Uuid) -> Result<Option<CadenceEnrollment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_enrollment(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_active_enrollment(
        &self,
        lead_id: Uuid,
        cadence_id: &str,
    ) -> Result<Option<CadenceEnrollment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
                     WHERE lead_id = ?1 AND cadence_id = ?2 AND active = 1"
                ),
                params![lead_id.to_string(), cadence_id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_enrollment(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_due_enrollments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CadenceEnrollment>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
                     WHERE active = 1 AND due_at <= ?1 ORDER BY due_at ASC"
                ),
                params![now.to_rfc3339()],
            )
            .await
            .map_err(db_err)?;
        let mut enrollments = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            enrollments.push(row_to_enrollment(&row)?);
        }
        Ok(enrollments)
    }

    async fn advance_enrollment(
        &self,
        id: Uuid,
        step_index: u32,
        due_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE enrollments SET step_index = ?2, due_at = ?3, updated_at = ?4 \
                 WHERE id = ?1 AND active = 1",
                params![
                    id.to_string(),
                    step_index as i64,
                    due_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "enrollment".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn deactivate_enrollment(&self, id: Uuid, reason: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE enrollments SET active = 0, exit_reason = ?2, updated_at = ?3 \
                 WHERE id = ?1",
                params![id.to_string(), reason, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save_circuit(&self, circuit: &ProviderCircuit) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO circuits \
                 (key, provider, domain, state, consecutive_failures, last_transition, probe_in_flight) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(key) DO UPDATE SET \
                   state = excluded.state, \
                   consecutive_failures = excluded.consecutive_failures, \
                   last_transition = excluded.last_transition, \
                   probe_in_flight = excluded.probe_in_flight",
                params![
                    circuit.key.storage_key(),
                    circuit.key.provider.clone(),
                    circuit.key.domain.clone(),
                    circuit.state.as_str(),
                    circuit.consecutive_failures as i64,
                    circuit.last_transition.to_rfc3339(),
                    circuit.probe_in_flight as i64,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_circuits(&self) -> Result<Vec<ProviderCircuit>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT key, provider, domain, state, consecutive_failures, \
                        last_transition, probe_in_flight FROM circuits",
                (),
            )
            .await
            .map_err(db_err)?;
        let mut circuits = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            circuits.push(row_to_circuit(&row)?);
        }
        Ok(circuits)
    }

    async fn try_reserve_daily_send(
        &self,
        day: NaiveDate,
        ceiling: i64,
    ) -> Result<bool, DatabaseError> {
        // Single upsert keeps the read-modify-write atomic: the UPDATE arm
        // only fires while the counter is below the ceiling, and RETURNING
        // tells us whether a reservation happened.
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO daily_sends (day, count) VALUES (?1, 1) \
                 ON CONFLICT(day) DO UPDATE SET count = count + 1 WHERE count < ?2 \
                 RETURNING count",
                params![day.format("%Y-%m-%d").to_string(), ceiling],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    async fn daily_sends(&self, day: NaiveDate) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT count FROM daily_sends WHERE day = ?1",
                params![day.format("%Y-%m-%d").to_string()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get(0).map_err(db_err),
            None => Ok(0),
        }
    }

    async fn add_suppression(&self, address: &str, reason: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO suppressions (address, reason, created_at) \
                 VALUES (?1, ?2, ?3)",
                params![
                    address.to_ascii_lowercase(),
                    reason,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn is_suppressed(&self, address: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM suppressions WHERE address = ?1",
                params![address.to_ascii_lowercase()],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    async fn list_suppressed_addresses(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT address FROM suppressions", ())
            .await
            .map_err(db_err)?;
        let mut addresses = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            addresses.push(row.get(0).map_err(db_err)?);
        }
        Ok(addresses)
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO audit_log (id, at, kind, lead_id, rule, detail) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.to_string(),
                    record.at.to_rfc3339(),
                    record.kind.as_str(),
                    record.lead_id.map(|id| id.to_string()),
                    record.rule.clone(),
                    record.detail.clone(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, at, kind, lead_id, rule, detail FROM audit_log \
                 ORDER BY at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(db_err)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            records.push(row_to_audit(&row)?);
        }
        Ok(records)
    }
}

/// The store doubles as the default enrichment lookup: attributes come
/// from the persisted lead record.
#[async_trait]
impl ProfileSource for LibSqlBackend {
    async fn lookup(&self, lead_id: Uuid) -> Result<Option<LeadAttributes>, DatabaseError> {
        Ok(self.get_lead(lead_id).await?.map(|lead| lead.attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::{CadenceDefinition, CadenceStep};
    use crate::channels::ChannelKind;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn lead() -> Lead {
        Lead::new(
            "ana@acme.com",
            LeadAttributes {
                title: "CEO".into(),
                organization: "Acme".into(),
                org_size: 120,
                industry: "saas".into(),
                tech_signals: vec!["kubernetes".into()],
                intent_signals: vec![],
                engagement_bonus: 0,
            },
        )
    }

    fn definition() -> CadenceDefinition {
        CadenceDefinition {
            id: "default".into(),
            name: "Default".into(),
            steps: vec![CadenceStep {
                offset_days: 0,
                channel: ChannelKind::Email,
                template: "intro".into(),
                exit_statuses: vec![],
                exit_on_min_opens: None,
            }],
        }
    }

    #[tokio::test]
    async fn lead_roundtrip() {
        let db = backend().await;
        let lead = lead();
        db.insert_lead(&lead).await.unwrap();

        let stored = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.address, "ana@acme.com");
        assert_eq!(stored.attributes.organization, "Acme");
        assert_eq!(stored.status, LeadStatus::Pending);

        db.update_lead_status(lead.id, LeadStatus::Sent, Utc::now())
            .await
            .unwrap();
        let stored = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Sent);
    }

    #[tokio::test]
    async fn update_missing_lead_is_not_found() {
        let db = backend().await;
        let err = db
            .update_lead_status(Uuid::new_v4(), LeadStatus::Sent, Utc::now())
            .await;
        assert!(matches!(err, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_leads_by_status() {
        let db = backend().await;
        let mut a = lead();
        a.status = LeadStatus::Sent;
        let mut b = Lead::new("bo@corp.com", LeadAttributes::default());
        b.status = LeadStatus::Opened;
        db.insert_lead(&a).await.unwrap();
        db.insert_lead(&b).await.unwrap();

        let sent = db
            .list_leads_with_status(&[LeadStatus::Sent])
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, a.id);

        let both = db
            .list_leads_with_status(&[LeadStatus::Sent, LeadStatus::Opened])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn event_dedupe_on_provider_event_id() {
        let db = backend().await;
        let lead = lead();
        db.insert_lead(&lead).await.unwrap();

        let event = SignalEvent::new(lead.id, SignalKind::Opened, "evt-1");
        assert!(db.insert_signal_event(&event).await.unwrap());
        assert!(!db.insert_signal_event(&event).await.unwrap());
        assert_eq!(
            db.count_signal_events(lead.id, SignalKind::Opened)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn one_active_enrollment_per_lead_per_cadence() {
        let db = backend().await;
        let lead = lead();
        db.insert_lead(&lead).await.unwrap();
        let def = definition();

        let first = CadenceEnrollment::new(lead.id, &def, Utc::now());
        db.insert_enrollment(&first).await.unwrap();

        let second = CadenceEnrollment::new(lead.id, &def, Utc::now());
        assert!(matches!(
            db.insert_enrollment(&second).await,
            Err(DatabaseError::Constraint(_)) | Err(DatabaseError::Query(_))
        ));

        // After deactivation, re-enrollment is allowed.
        db.deactivate_enrollment(first.id, "replied").await.unwrap();
        db.insert_enrollment(&second).await.unwrap();
    }

    #[tokio::test]
    async fn due_enrollments_and_advance() {
        let db = backend().await;
        let lead = lead();
        db.insert_lead(&lead).await.unwrap();
        let def = definition();
        let enrollment = CadenceEnrollment::new(lead.id, &def, Utc::now());
        db.insert_enrollment(&enrollment).await.unwrap();

        let due = db.list_due_enrollments(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);

        let next_due = Utc::now() + chrono::Duration::days(3);
        db.advance_enrollment(enrollment.id, 1, next_due)
            .await
            .unwrap();
        let due = db.list_due_enrollments(Utc::now()).await.unwrap();
        assert!(due.is_empty());

        let stored = db.get_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.step_index, 1);
    }

    #[tokio::test]
    async fn circuit_roundtrip() {
        let db = backend().await;
        let mut circuit = ProviderCircuit::new(CircuitKey::scoped("email", "corp.com"));
        circuit.state = CircuitState::Open;
        circuit.consecutive_failures = 5;
        db.save_circuit(&circuit).await.unwrap();
        // Upsert on the same key.
        circuit.state = CircuitState::HalfOpen;
        db.save_circuit(&circuit).await.unwrap();

        let circuits = db.list_circuits().await.unwrap();
        assert_eq!(circuits.len(), 1);
        assert_eq!(circuits[0].state, CircuitState::HalfOpen);
        assert_eq!(circuits[0].key.domain.as_deref(), Some("corp.com"));
    }

    #[tokio::test]
    async fn daily_reserve_respects_ceiling() {
        let db = backend().await;
        let day = Utc::now().date_naive();
        assert!(db.try_reserve_daily_send(day, 2).await.unwrap());
        assert!(db.try_reserve_daily_send(day, 2).await.unwrap());
        assert!(!db.try_reserve_daily_send(day, 2).await.unwrap());
        assert_eq!(db.daily_sends(day).await.unwrap(), 2);

        // A different day has its own counter.
        let tomorrow = day + chrono::Days::new(1);
        assert!(db.try_reserve_daily_send(tomorrow, 2).await.unwrap());
    }

    #[tokio::test]
    async fn suppression_is_case_insensitive() {
        let db = backend().await;
        db.add_suppression("Ana@Acme.com", "bounced").await.unwrap();
        assert!(db.is_suppressed("ana@acme.com").await.unwrap());
        assert!(db.is_suppressed("ANA@ACME.COM").await.unwrap());
        assert!(!db.is_suppressed("other@acme.com").await.unwrap());
        assert_eq!(
            db.list_suppressed_addresses().await.unwrap(),
            vec!["ana@acme.com".to_string()]
        );
    }

    #[tokio::test]
    async fn file_backed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leadflow.db");

        let lead = lead();
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_lead(&lead).await.unwrap();
            let mut circuit = ProviderCircuit::new(CircuitKey::provider("email"));
            circuit.state = CircuitState::Open;
            circuit.consecutive_failures = 5;
            db.save_circuit(&circuit).await.unwrap();
        }

        // Reopen: an Open breaker is not forgotten by a restart.
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let stored = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.address, "ana@acme.com");
        let circuits = db.list_circuits().await.unwrap();
        assert_eq!(circuits.len(), 1);
        assert_eq!(circuits[0].state, CircuitState::Open);
    }

    #[tokio::test]
    async fn audit_roundtrip() {
        let db = backend().await;
        let record = AuditRecord::new(
            AuditKind::GuardRejection,
            None,
            "domain_exclusion",
            "domain 'x.com' excluded",
        );
        db.append_audit(&record).await.unwrap();
        let records = db.list_audit(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule, "domain_exclusion");
        assert_eq!(records[0].kind, AuditKind::GuardRejection);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gatekeeper_core::{AttentionLevel, AutonomyTier, Channel, GateError, ReasonCode, Verdict};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value as SqlValue};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::log::{self, DecisionLog, DecisionRecord, LogFilter, Page, Pagination, Resolution, ResolutionRecord};
use crate::policy::{CompanyPolicy, PolicyRepository, RateLimits};
use crate::profile::{AttentionProfile, ProfileRepository};
use crate::ratelimit::{RateCheck, RateLimiter, RateScope, WindowKind};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    level TEXT NOT NULL,
    channels TEXT NOT NULL,
    autonomy TEXT NOT NULL,
    quiet_hours TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS policies (
    company_id TEXT PRIMARY KEY,
    max_autonomy TEXT NOT NULL,
    forbidden TEXT NOT NULL DEFAULT '[]',
    ai_calls_per_user_per_day INTEGER NOT NULL,
    ai_calls_per_company_per_day INTEGER NOT NULL,
    automations_per_hour INTEGER NOT NULL,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS decisions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    action TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    company_id TEXT NOT NULL,
    decision TEXT NOT NULL,
    reason TEXT NOT NULL,
    detail TEXT NOT NULL,
    params_digest TEXT NOT NULL,
    channels TEXT NOT NULL DEFAULT '[]',
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_decisions_company ON decisions(company_id, seq);
CREATE INDEX IF NOT EXISTS idx_decisions_pending ON decisions(decision, timestamp);

CREATE TRIGGER IF NOT EXISTS decisions_no_update BEFORE UPDATE ON decisions
BEGIN
    SELECT RAISE(ABORT, 'decision log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS decisions_no_delete BEFORE DELETE ON decisions
BEGIN
    SELECT RAISE(ABORT, 'decision log is append-only');
END;

CREATE TABLE IF NOT EXISTS decision_resolutions (
    decision_id TEXT PRIMARY KEY REFERENCES decisions(id),
    resolution TEXT NOT NULL,
    resolved_by TEXT NOT NULL,
    resolved_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rate_counters (
    scope_key TEXT PRIMARY KEY,
    window_kind TEXT NOT NULL,
    window_start INTEGER NOT NULL,
    count INTEGER NOT NULL
);
";

/// Increments only when the stored window is stale or the count is below the
/// limit; `RETURNING` yields no row when the increment was refused.
const CHECK_AND_INCREMENT: &str = "
INSERT INTO rate_counters (scope_key, window_kind, window_start, count) VALUES (?1, ?2, ?3, 1)
ON CONFLICT(scope_key) DO UPDATE SET
    count = CASE WHEN rate_counters.window_start = excluded.window_start
                 THEN rate_counters.count + 1 ELSE 1 END,
    window_start = excluded.window_start
WHERE rate_counters.window_start <> excluded.window_start OR rate_counters.count < ?4
RETURNING count
";

const DECISION_COLUMNS: &str =
    "d.id, d.action, d.actor_id, d.company_id, d.decision, d.reason, d.detail, d.params_digest, d.channels, d.timestamp";

/// How long a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// SQLite-backed implementation of every store trait.
///
/// Statements run on tokio's blocking pool, so a locked database occupies a
/// blocking thread for at most the busy timeout and never a runtime worker.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

fn store_err(e: rusqlite::Error) -> GateError {
    GateError::Store(e.to_string())
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> gatekeeper_core::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GateError::Store(format!("bad timestamp '{raw}': {e}")))
}

fn corrupt(column: &str, raw: &str) -> GateError {
    GateError::Store(format!("unexpected {column} value '{raw}'"))
}

impl SqliteStore {
    /// Open or create the database at `path` with the default busy timeout.
    pub fn open(path: &Path) -> gatekeeper_core::Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create the database at `path`. Statements that find the
    /// database locked give up after `busy_timeout`.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> gatekeeper_core::Result<Self> {
        info!(?path, busy_timeout_ms = busy_timeout.as_millis() as u64, "opening gatekeeper store");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;
        // WAL lets audit readers run beside the writer.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(store_err)?;
        conn.busy_timeout(busy_timeout).map_err(store_err)?;
        Self::init(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> gatekeeper_core::Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> gatekeeper_core::Result<Self> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> gatekeeper_core::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> gatekeeper_core::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock();
            f(&*conn)
        })
        .await
        .map_err(|e| GateError::Store(format!("store task failed: {e}")))?
    }
}

fn decisions_page(
    db: &Connection,
    mut clauses: Vec<String>,
    mut values: Vec<SqlValue>,
    filter: &LogFilter,
    page: Pagination,
) -> gatekeeper_core::Result<Page<DecisionRecord>> {
    push_filter(filter, &mut clauses, &mut values);
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = db
        .query_row(
            &format!("SELECT COUNT(*) FROM decisions d {where_sql}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )
        .map_err(store_err)?;

    values.push(SqlValue::Integer(i64::from(page.limit)));
    values.push(SqlValue::Integer(i64::from(page.offset)));
    let sql = format!(
        "SELECT {DECISION_COLUMNS} FROM decisions d {where_sql} ORDER BY d.seq DESC LIMIT ? OFFSET ?"
    );
    let mut stmt = db.prepare(&sql).map_err(store_err)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), RawDecision::from_row)
        .map_err(store_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_err)?;

    Ok(Page {
        items: rows
            .into_iter()
            .map(RawDecision::into_record)
            .collect::<gatekeeper_core::Result<_>>()?,
        total: total.max(0) as u64,
        limit: page.limit,
        offset: page.offset,
    })
}

fn push_filter(filter: &LogFilter, clauses: &mut Vec<String>, values: &mut Vec<SqlValue>) {
    let mut eq = |column: &str, value: String| {
        clauses.push(format!("d.{column} = ?"));
        values.push(SqlValue::Text(value));
    };
    if let Some(ref c) = filter.company_id {
        eq("company_id", c.clone());
    }
    if let Some(ref a) = filter.actor_id {
        eq("actor_id", a.clone());
    }
    if let Some(ref a) = filter.action {
        eq("action", a.clone());
    }
    if let Some(d) = filter.decision {
        eq("decision", d.as_str().to_string());
    }
    if let Some(from) = filter.from {
        clauses.push("d.timestamp >= ?".into());
        values.push(SqlValue::Text(ts(from)));
    }
    if let Some(to) = filter.to {
        clauses.push("d.timestamp <= ?".into());
        values.push(SqlValue::Text(ts(to)));
    }
}

/// Column values as stored, before enum and JSON decoding.
struct RawDecision {
    id: String,
    action: String,
    actor_id: String,
    company_id: String,
    decision: String,
    reason: String,
    detail: String,
    params_digest: String,
    channels: String,
    timestamp: String,
}

impl RawDecision {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            action: row.get(1)?,
            actor_id: row.get(2)?,
            company_id: row.get(3)?,
            decision: row.get(4)?,
            reason: row.get(5)?,
            detail: row.get(6)?,
            params_digest: row.get(7)?,
            channels: row.get(8)?,
            timestamp: row.get(9)?,
        })
    }

    fn into_record(self) -> gatekeeper_core::Result<DecisionRecord> {
        Ok(DecisionRecord {
            id: Uuid::parse_str(&self.id).map_err(|_| corrupt("id", &self.id))?,
            decision: Verdict::parse(&self.decision).ok_or_else(|| corrupt("decision", &self.decision))?,
            reason: ReasonCode::parse(&self.reason).ok_or_else(|| corrupt("reason", &self.reason))?,
            channels: serde_json::from_str::<Vec<Channel>>(&self.channels)?,
            timestamp: parse_ts(&self.timestamp)?,
            action: self.action,
            actor_id: self.actor_id,
            company_id: self.company_id,
            detail: self.detail,
            params_digest: self.params_digest,
        })
    }
}

// ── Profiles ───────────────────────────────────────────────────

#[async_trait]
impl ProfileRepository for SqliteStore {
    async fn load_profile(&self, user_id: &str) -> gatekeeper_core::Result<Option<AttentionProfile>> {
        let user_id = user_id.to_string();
        self.call(move |db| {
            let row = db
                .query_row(
                    "SELECT level, channels, autonomy, quiet_hours, updated_at FROM profiles WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(store_err)?;
            let Some((level, channels, autonomy, quiet_hours, updated_at)) = row else {
                return Ok(None);
            };
            Ok(Some(AttentionProfile {
                level: AttentionLevel::parse(&level).ok_or_else(|| corrupt("level", &level))?,
                channels: serde_json::from_str(&channels)?,
                autonomy: AutonomyTier::parse(&autonomy).ok_or_else(|| corrupt("autonomy", &autonomy))?,
                quiet_hours: serde_json::from_str(&quiet_hours)?,
                updated_at: parse_ts(&updated_at)?,
                user_id,
            }))
        })
        .await
    }

    async fn save_profile(&self, profile: &AttentionProfile) -> gatekeeper_core::Result<()> {
        let channels = serde_json::to_string(&profile.channels)?;
        let quiet_hours = serde_json::to_string(&profile.quiet_hours)?;
        let profile = profile.clone();
        self.call(move |db| {
            db.execute(
                "INSERT INTO profiles (user_id, level, channels, autonomy, quiet_hours, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                    level = excluded.level,
                    channels = excluded.channels,
                    autonomy = excluded.autonomy,
                    quiet_hours = excluded.quiet_hours,
                    updated_at = excluded.updated_at",
                params![
                    profile.user_id,
                    profile.level.as_str(),
                    channels,
                    profile.autonomy.as_str(),
                    quiet_hours,
                    ts(profile.updated_at),
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }
}

// ── Policies ───────────────────────────────────────────────────

#[async_trait]
impl PolicyRepository for SqliteStore {
    async fn load_policy(&self, company_id: &str) -> gatekeeper_core::Result<Option<CompanyPolicy>> {
        let company_id = company_id.to_string();
        self.call(move |db| {
            let row = db
                .query_row(
                    "SELECT max_autonomy, forbidden, ai_calls_per_user_per_day, ai_calls_per_company_per_day,
                            automations_per_hour, updated_at
                     FROM policies WHERE company_id = ?1",
                    params![company_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, u32>(2)?,
                            row.get::<_, u32>(3)?,
                            row.get::<_, u32>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    },
                )
                .optional()
                .map_err(store_err)?;
            let Some((max_autonomy, forbidden, per_user, per_company, per_hour, updated_at)) = row else {
                return Ok(None);
            };
            Ok(Some(CompanyPolicy {
                max_autonomy: AutonomyTier::parse(&max_autonomy)
                    .ok_or_else(|| corrupt("max_autonomy", &max_autonomy))?,
                forbidden: serde_json::from_str(&forbidden)?,
                rate_limits: RateLimits {
                    ai_calls_per_user_per_day: per_user,
                    ai_calls_per_company_per_day: per_company,
                    automations_per_hour: per_hour,
                },
                updated_at: updated_at.as_deref().map(parse_ts).transpose()?,
                company_id,
            }))
        })
        .await
    }

    async fn save_policy(&self, policy: &CompanyPolicy) -> gatekeeper_core::Result<()> {
        let forbidden = serde_json::to_string(&policy.forbidden)?;
        let policy = policy.clone();
        self.call(move |db| {
            db.execute(
                "INSERT INTO policies (company_id, max_autonomy, forbidden, ai_calls_per_user_per_day,
                                       ai_calls_per_company_per_day, automations_per_hour, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(company_id) DO UPDATE SET
                    max_autonomy = excluded.max_autonomy,
                    forbidden = excluded.forbidden,
                    ai_calls_per_user_per_day = excluded.ai_calls_per_user_per_day,
                    ai_calls_per_company_per_day = excluded.ai_calls_per_company_per_day,
                    automations_per_hour = excluded.automations_per_hour,
                    updated_at = excluded.updated_at",
                params![
                    policy.company_id,
                    policy.max_autonomy.as_str(),
                    forbidden,
                    policy.rate_limits.ai_calls_per_user_per_day,
                    policy.rate_limits.ai_calls_per_company_per_day,
                    policy.rate_limits.automations_per_hour,
                    policy.updated_at.map(ts),
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }
}

// ── Rate limiter ───────────────────────────────────────────────

#[async_trait]
impl RateLimiter for SqliteStore {
    async fn check_and_increment(
        &self,
        scope: &RateScope,
        limit: u32,
        now: DateTime<Utc>,
    ) -> gatekeeper_core::Result<RateCheck> {
        if limit == 0 {
            return Ok(RateCheck::denied());
        }
        let window = scope.window();
        let key = scope.key();
        let count: Option<i64> = self
            .call(move |db| {
                db.query_row(
                    CHECK_AND_INCREMENT,
                    params![key, window.as_str(), window.start(now), limit],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)
            })
            .await?;
        Ok(match count {
            Some(n) => RateCheck {
                allowed: true,
                remaining: u32::try_from(i64::from(limit) - n).unwrap_or(0),
            },
            None => RateCheck::denied(),
        })
    }

    async fn release(&self, scope: &RateScope, now: DateTime<Utc>) -> gatekeeper_core::Result<()> {
        let key = scope.key();
        let window_start = scope.window().start(now);
        self.call(move |db| {
            db.execute(
                "UPDATE rate_counters SET count = count - 1
                 WHERE scope_key = ?1 AND window_start = ?2 AND count > 0",
                params![key, window_start],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> gatekeeper_core::Result<usize> {
        let removed = self
            .call(move |db| {
                db.execute(
                    "DELETE FROM rate_counters
                     WHERE (window_kind = ?1 AND window_start < ?2) OR (window_kind = ?3 AND window_start < ?4)",
                    params![
                        WindowKind::Day.as_str(),
                        WindowKind::Day.start(now),
                        WindowKind::Hour.as_str(),
                        WindowKind::Hour.start(now),
                    ],
                )
                .map_err(store_err)
            })
            .await?;
        if removed > 0 {
            debug!(removed, "swept expired rate-limit counters");
        }
        Ok(removed)
    }
}

// ── Decision log ───────────────────────────────────────────────

#[async_trait]
impl DecisionLog for SqliteStore {
    async fn append(&self, record: &DecisionRecord) -> gatekeeper_core::Result<()> {
        let channels = serde_json::to_string(&record.channels)?;
        let record = record.clone();
        self.call(move |db| {
            let id = record.id.to_string();
            let at = ts(record.timestamp);
            let inserted = db
                .execute(
                    "INSERT INTO decisions (id, action, actor_id, company_id, decision, reason, detail,
                                            params_digest, channels, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        id,
                        record.action,
                        record.actor_id,
                        record.company_id,
                        record.decision.as_str(),
                        record.reason.as_str(),
                        record.detail,
                        record.params_digest,
                        channels,
                        at,
                    ],
                )
                .map_err(store_err)?;
            if inserted > 0 {
                return Ok(());
            }
            let same: bool = db
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM decisions
                     WHERE id = ?1 AND action = ?2 AND actor_id = ?3 AND company_id = ?4 AND decision = ?5
                       AND reason = ?6 AND detail = ?7 AND params_digest = ?8 AND channels = ?9
                       AND timestamp = ?10)",
                    params![
                        id,
                        record.action,
                        record.actor_id,
                        record.company_id,
                        record.decision.as_str(),
                        record.reason.as_str(),
                        record.detail,
                        record.params_digest,
                        channels,
                        at,
                    ],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            if same {
                debug!(%id, "decision already logged");
                Ok(())
            } else {
                Err(log::conflicting_append(record.id))
            }
        })
        .await
    }

    async fn query(&self, filter: &LogFilter, page: Pagination) -> gatekeeper_core::Result<Page<DecisionRecord>> {
        let filter = filter.clone();
        self.call(move |db| decisions_page(db, Vec::new(), Vec::new(), &filter, page))
            .await
    }

    async fn pending(
        &self,
        filter: &LogFilter,
        since: DateTime<Utc>,
        page: Pagination,
    ) -> gatekeeper_core::Result<Page<DecisionRecord>> {
        let clauses = vec![
            "d.decision = ?".to_string(),
            "d.timestamp >= ?".to_string(),
            "NOT EXISTS (SELECT 1 FROM decision_resolutions r WHERE r.decision_id = d.id)".to_string(),
        ];
        let values = vec![
            SqlValue::Text(Verdict::Suggest.as_str().to_string()),
            SqlValue::Text(ts(since)),
        ];
        let filter = filter.clone();
        self.call(move |db| decisions_page(db, clauses, values, &filter, page))
            .await
    }

    async fn get(&self, id: Uuid) -> gatekeeper_core::Result<Option<DecisionRecord>> {
        self.call(move |db| {
            let raw = db
                .query_row(
                    &format!("SELECT {DECISION_COLUMNS} FROM decisions d WHERE d.id = ?1"),
                    params![id.to_string()],
                    RawDecision::from_row,
                )
                .optional()
                .map_err(store_err)?;
            raw.map(RawDecision::into_record).transpose()
        })
        .await
    }

    async fn resolve(&self, resolution: &ResolutionRecord) -> gatekeeper_core::Result<()> {
        let resolution = resolution.clone();
        self.call(move |db| {
            let id = resolution.decision_id.to_string();
            let decision: Option<String> = db
                .query_row("SELECT decision FROM decisions WHERE id = ?1", params![id], |row| row.get(0))
                .optional()
                .map_err(store_err)?;
            match decision.as_deref().map(Verdict::parse) {
                None => return Err(log::not_found(resolution.decision_id)),
                Some(Some(Verdict::Suggest)) => {}
                Some(_) => {
                    return Err(GateError::Conflict(format!(
                        "decision {id} is {}, only SUGGEST entries can be resolved",
                        decision.unwrap_or_default()
                    )));
                }
            }
            if let Some(existing) = load_resolution(db, resolution.decision_id)? {
                return Err(log::already_resolved(&existing));
            }
            db.execute(
                "INSERT INTO decision_resolutions (decision_id, resolution, resolved_by, resolved_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    resolution.resolution.as_str(),
                    resolution.resolved_by,
                    ts(resolution.resolved_at),
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn resolution(&self, id: Uuid) -> gatekeeper_core::Result<Option<ResolutionRecord>> {
        self.call(move |db| load_resolution(db, id)).await
    }
}

fn load_resolution(db: &Connection, id: Uuid) -> gatekeeper_core::Result<Option<ResolutionRecord>> {
    let row = db
        .query_row(
            "SELECT resolution, resolved_by, resolved_at FROM decision_resolutions WHERE decision_id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(store_err)?;
    let Some((resolution, resolved_by, resolved_at)) = row else {
        return Ok(None);
    };
    Ok(Some(ResolutionRecord {
        decision_id: id,
        resolution: Resolution::parse(&resolution).ok_or_else(|| corrupt("resolution", &resolution))?,
        resolved_by,
        resolved_at: parse_ts(&resolved_at)?,
    }))
}

//! Persistent cron scheduler. Jobs live in one JSON file (rewritten whole
//! on every mutation, schema versioned); a single worker task sleeps until
//! the earliest due time and is woken early by any mutation.
//!
//! Three schedule kinds: `at` (absolute ms), `every` (fixed period), and
//! `cron` (5-field expression matched in local time).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, TimeZone, Timelike};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use porter_core::{now_ms, random_id};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CronSchedule {
    /// `at` | `every` | `cron`.
    pub kind: String,
    pub at_ms: i64,
    pub every_ms: i64,
    pub expr: String,
}

impl CronSchedule {
    pub fn at(at_ms: i64) -> Self {
        Self {
            kind: "at".into(),
            at_ms,
            ..Default::default()
        }
    }

    pub fn every(every_ms: i64) -> Self {
        Self {
            kind: "every".into(),
            every_ms,
            ..Default::default()
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            kind: "cron".into(),
            expr: expr.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CronPayload {
    pub kind: String,
    pub message: String,
    pub deliver: bool,
    pub channel: String,
    pub to: String,
}

impl Default for CronPayload {
    fn default() -> Self {
        Self {
            kind: "agent_turn".into(),
            message: String::new(),
            deliver: false,
            channel: String::new(),
            to: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CronJobState {
    pub next_run_at_ms: i64,
    pub last_run_at_ms: i64,
    pub last_status: String,
    pub last_error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    pub state: CronJobState,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub delete_after_run: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CronStoreFile {
    version: u32,
    jobs: Vec<CronJob>,
}

// ── Cron expression parsing ─────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CronSpec {
    minutes: [bool; 60],
    hours: [bool; 24],
    month_days: [bool; 32],
    months: [bool; 13],
    week_days: [bool; 8],
    dom_any: bool,
    dow_any: bool,
}

fn parse_cron_field(
    token: &str,
    min_v: u32,
    max_v: u32,
    out: &mut [bool],
    allow_weekday_7: bool,
) -> Option<bool> {
    let mut saw_any = false;
    let mut marked = false;

    for part in token.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }

        let (base, step) = match part.split_once('/') {
            Some((base, step_text)) => {
                let step: u32 = step_text.parse().ok().filter(|s| *s > 0)?;
                (base, step)
            }
            None => (part, 1),
        };

        let (start, end) = if base == "*" || base.is_empty() {
            saw_any = true;
            (min_v, max_v)
        } else if let Some((a, b)) = base.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let one: u32 = base.parse().ok()?;
            (one, one)
        };

        if start > end {
            return None;
        }

        let mut v = start;
        while v <= end {
            if v < min_v || v > max_v {
                return None;
            }
            if allow_weekday_7 && v == 7 {
                out[0] = true;
                out[7] = true;
            } else {
                out[v as usize] = true;
            }
            marked = true;
            v += step;
        }
    }

    marked.then_some(saw_any)
}

fn parse_cron_expr(expr: &str) -> Option<CronSpec> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }

    let mut spec = CronSpec {
        minutes: [false; 60],
        hours: [false; 24],
        month_days: [false; 32],
        months: [false; 13],
        week_days: [false; 8],
        dom_any: false,
        dow_any: false,
    };

    parse_cron_field(fields[0], 0, 59, &mut spec.minutes, false)?;
    parse_cron_field(fields[1], 0, 23, &mut spec.hours, false)?;
    spec.dom_any = parse_cron_field(fields[2], 1, 31, &mut spec.month_days, false)?;
    parse_cron_field(fields[3], 1, 12, &mut spec.months, false)?;
    spec.dow_any = parse_cron_field(fields[4], 0, 7, &mut spec.week_days, true)?;
    Some(spec)
}

fn cron_match(spec: &CronSpec, t: &chrono::DateTime<Local>) -> bool {
    let minute_ok = spec.minutes[t.minute() as usize];
    let hour_ok = spec.hours[t.hour() as usize];
    let month_ok = spec.months[t.month() as usize];
    if !(minute_ok && hour_ok && month_ok) {
        return false;
    }

    let dom_ok = spec.month_days[t.day() as usize];
    let dow_ok = spec.week_days[t.weekday().num_days_from_sunday() as usize];

    // Cron's day quirk: both wildcards match; one restricted field must
    // match; both restricted combine with OR.
    match (spec.dom_any, spec.dow_any) {
        (true, true) => true,
        (true, false) => dow_ok,
        (false, true) => dom_ok,
        (false, false) => dom_ok || dow_ok,
    }
}

/// Next fire strictly after `now_ms_val`, stepping whole minutes for at
/// most two years. Returns 0 for invalid expressions or no match.
pub fn next_cron_run_ms(expr: &str, now_ms_val: i64) -> i64 {
    let Some(spec) = parse_cron_expr(expr) else {
        return 0;
    };

    let now_secs = now_ms_val / 1000;
    let mut t = now_secs + (60 - now_secs % 60);
    const MAX_MINUTE_LOOKAHEAD: i64 = 60 * 24 * 366 * 2;

    for _ in 0..MAX_MINUTE_LOOKAHEAD {
        if let chrono::LocalResult::Single(local) = Local.timestamp_opt(t, 0) {
            if cron_match(&spec, &local) {
                return t * 1000;
            }
        }
        t += 60;
    }
    0
}

fn compute_next_run_ms(schedule: &CronSchedule, now: i64) -> i64 {
    match schedule.kind.as_str() {
        "at" => {
            if schedule.at_ms > now {
                schedule.at_ms
            } else {
                0
            }
        }
        "every" => {
            if schedule.every_ms > 0 {
                now + schedule.every_ms
            } else {
                0
            }
        }
        "cron" => next_cron_run_ms(&schedule.expr, now),
        _ => 0,
    }
}

// ── Service ─────────────────────────────────────────────────────────────

/// Callback fired per due job. An `Err` is recorded on the job as
/// `last_status == "error"`.
pub type OnJob =
    Arc<dyn Fn(CronJob) -> BoxFuture<'static, Result<Option<String>, String>> + Send + Sync>;

pub struct CronService {
    inner: Arc<CronInner>,
}

struct CronInner {
    store_path: PathBuf,
    jobs: Mutex<Vec<CronJob>>,
    on_job: Mutex<Option<OnJob>>,
    running: AtomicBool,
    notify: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CronService {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        let inner = Arc::new(CronInner {
            store_path: store_path.into(),
            jobs: Mutex::new(Vec::new()),
            on_job: Mutex::new(None),
            running: AtomicBool::new(false),
            notify: Notify::new(),
            worker: Mutex::new(None),
        });
        Self::load_store(&inner);
        Self { inner }
    }

    pub fn set_on_job(&self, on_job: OnJob) {
        *self.inner.on_job.lock() = Some(on_job);
    }

    /// Recompute every enabled job's next fire from "now" and spawn the
    /// scheduler worker. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let now = now_ms();
            let mut jobs = self.inner.jobs.lock();
            for job in jobs.iter_mut() {
                if job.enabled {
                    job.state.next_run_at_ms = compute_next_run_ms(&job.schedule, now);
                }
            }
        }
        Self::save_store(&self.inner);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            info!("cron scheduler started");
            Self::run_loop(inner).await;
            debug!("cron scheduler stopped");
        });
        *self.inner.worker.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.notify.notify_waiters();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn list_jobs(&self, include_disabled: bool) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self
            .inner
            .jobs
            .lock()
            .iter()
            .filter(|j| include_disabled || j.enabled)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.state.next_run_at_ms);
        jobs
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_job(
        &self,
        name: &str,
        schedule: CronSchedule,
        message: &str,
        deliver: bool,
        channel: &str,
        to: &str,
        delete_after_run: bool,
    ) -> CronJob {
        let now = now_ms();
        let job = CronJob {
            id: random_id(8),
            name: name.to_string(),
            enabled: true,
            state: CronJobState {
                next_run_at_ms: compute_next_run_ms(&schedule, now),
                ..Default::default()
            },
            schedule,
            payload: CronPayload {
                kind: "agent_turn".into(),
                message: message.to_string(),
                deliver,
                channel: channel.to_string(),
                to: to.to_string(),
            },
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run,
        };

        self.inner.jobs.lock().push(job.clone());
        Self::save_store(&self.inner);
        self.inner.notify.notify_waiters();
        info!(job_id = %job.id, kind = %job.schedule.kind, "cron job added");
        job
    }

    pub fn remove_job(&self, id: &str) -> bool {
        let removed = {
            let mut jobs = self.inner.jobs.lock();
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() != before
        };
        if removed {
            Self::save_store(&self.inner);
            self.inner.notify.notify_waiters();
            info!(job_id = %id, "cron job removed");
        }
        removed
    }

    pub fn enable_job(&self, id: &str, enabled: bool) -> Option<CronJob> {
        let updated = {
            let mut jobs = self.inner.jobs.lock();
            let job = jobs.iter_mut().find(|j| j.id == id)?;
            job.enabled = enabled;
            job.updated_at_ms = now_ms();
            job.state.next_run_at_ms = if enabled {
                compute_next_run_ms(&job.schedule, now_ms())
            } else {
                0
            };
            Some(job.clone())
        };
        if updated.is_some() {
            Self::save_store(&self.inner);
            self.inner.notify.notify_waiters();
        }
        updated
    }

    /// Fire one job immediately, outside its schedule.
    pub async fn run_job_now(&self, id: &str, force: bool) -> bool {
        let job = {
            let jobs = self.inner.jobs.lock();
            jobs.iter().find(|j| j.id == id).cloned()
        };
        let Some(job) = job else {
            return false;
        };
        if !force && !job.enabled {
            return false;
        }
        Self::execute_job(&self.inner, job).await;
        Self::prune_finished(&self.inner);
        Self::save_store(&self.inner);
        self.inner.notify.notify_waiters();
        true
    }

    pub fn status(&self) -> serde_json::Value {
        let jobs = self.inner.jobs.lock();
        let next_wake = jobs
            .iter()
            .filter(|j| j.enabled && j.state.next_run_at_ms > 0)
            .map(|j| j.state.next_run_at_ms)
            .min()
            .unwrap_or(0);
        json!({
            "enabled": self.inner.running.load(Ordering::SeqCst),
            "jobs": jobs.len(),
            "nextWakeAtMs": next_wake,
        })
    }

    async fn run_loop(inner: Arc<CronInner>) {
        while inner.running.load(Ordering::SeqCst) {
            let next_wake = {
                let jobs = inner.jobs.lock();
                jobs.iter()
                    .filter(|j| j.enabled && j.state.next_run_at_ms > 0)
                    .map(|j| j.state.next_run_at_ms)
                    .min()
                    .unwrap_or(0)
            };

            if next_wake == 0 {
                let _ = tokio::time::timeout(
                    Duration::from_millis(500),
                    inner.notify.notified(),
                )
                .await;
                continue;
            }

            let now = now_ms();
            if now < next_wake {
                // Bounded sleep so a newly added earlier job can wake us.
                let _ = tokio::time::timeout(
                    Duration::from_millis((next_wake - now) as u64),
                    inner.notify.notified(),
                )
                .await;
                continue;
            }

            let due: Vec<CronJob> = {
                let jobs = inner.jobs.lock();
                let now = now_ms();
                jobs.iter()
                    .filter(|j| {
                        j.enabled && j.state.next_run_at_ms > 0 && now >= j.state.next_run_at_ms
                    })
                    .cloned()
                    .collect()
            };

            for job in due {
                Self::execute_job(&inner, job).await;
            }
            Self::prune_finished(&inner);
            Self::save_store(&inner);
        }
    }

    /// Run the callback for one job, then write the outcome back onto the
    /// stored job. The job list lock is held only for the state mutation;
    /// the callback itself runs unlocked.
    async fn execute_job(inner: &Arc<CronInner>, job: CronJob) {
        let started_at = now_ms();
        let job_id = job.id.clone();
        debug!(job_id = %job_id, name = %job.name, "firing cron job");

        let callback = inner.on_job.lock().clone();
        let outcome = match callback {
            Some(cb) => cb(job).await,
            None => Ok(None),
        };

        let mut jobs = inner.jobs.lock();
        let Some(stored) = jobs.iter_mut().find(|j| j.id == job_id) else {
            return;
        };

        match outcome {
            Ok(_) => {
                stored.state.last_status = "ok".into();
                stored.state.last_error.clear();
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "cron job failed");
                stored.state.last_status = "error".into();
                stored.state.last_error = e;
            }
        }
        stored.state.last_run_at_ms = started_at;
        stored.updated_at_ms = now_ms();

        if stored.schedule.kind == "at" {
            if !stored.delete_after_run {
                stored.enabled = false;
                stored.state.next_run_at_ms = 0;
            }
        } else {
            stored.state.next_run_at_ms = compute_next_run_ms(&stored.schedule, now_ms());
        }
    }

    /// Drop `at` jobs flagged delete-after-run once they ran successfully.
    fn prune_finished(inner: &Arc<CronInner>) {
        let mut jobs = inner.jobs.lock();
        jobs.retain(|j| {
            !(j.schedule.kind == "at" && j.delete_after_run && j.state.last_status == "ok")
        });
    }

    fn load_store(inner: &Arc<CronInner>) {
        let Ok(raw) = std::fs::read_to_string(&inner.store_path) else {
            return;
        };
        match serde_json::from_str::<CronStoreFile>(&raw) {
            Ok(store) => {
                let mut jobs = inner.jobs.lock();
                *jobs = store.jobs;
                for job in jobs.iter_mut() {
                    if job.id.is_empty() {
                        job.id = random_id(8);
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to load cron store"),
        }
    }

    fn save_store(inner: &Arc<CronInner>) {
        let store = CronStoreFile {
            version: 1,
            jobs: inner.jobs.lock().clone(),
        };
        if let Some(parent) = inner.store_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&store) {
            Ok(rendered) => {
                if let Err(e) = std::fs::write(&inner.store_path, rendered) {
                    warn!(error = %e, "failed to save cron store");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize cron store"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert!(parse_cron_expr("* * * *").is_none());
        assert!(parse_cron_expr("* * * * * *").is_none());
        assert!(parse_cron_expr("").is_none());
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert!(parse_cron_expr("60 * * * *").is_none());
        assert!(parse_cron_expr("* 24 * * *").is_none());
        assert!(parse_cron_expr("* * 0 * *").is_none());
        assert!(parse_cron_expr("* * * 13 *").is_none());
        assert!(parse_cron_expr("* * * * 8").is_none());
        assert!(parse_cron_expr("*/0 * * * *").is_none());
        assert!(parse_cron_expr("5-2 * * * *").is_none());
    }

    #[test]
    fn test_parse_lists_ranges_steps() {
        let spec = parse_cron_expr("0,30 9-17 * * *").unwrap();
        assert!(spec.minutes[0] && spec.minutes[30]);
        assert!(!spec.minutes[15]);
        assert!(spec.hours[9] && spec.hours[17]);
        assert!(!spec.hours[8]);

        let spec = parse_cron_expr("*/15 * * * *").unwrap();
        for m in 0..60 {
            assert_eq!(spec.minutes[m], m % 15 == 0);
        }
    }

    #[test]
    fn test_weekday_seven_is_sunday() {
        let spec = parse_cron_expr("* * * * 7").unwrap();
        assert!(spec.week_days[0]);
        assert!(spec.week_days[7]);
        assert!(!spec.week_days[1]);
    }

    fn local_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_next_fire_is_strictly_future_and_matches() {
        // 2030-06-14 is a Friday.
        let t = local_ms(2030, 6, 14, 10, 20);
        let next = next_cron_run_ms("*/15 * * * *", t);
        assert_eq!(next, local_ms(2030, 6, 14, 10, 30));

        // No earlier matching minute exists between T and F.
        let mid = local_ms(2030, 6, 14, 10, 25);
        assert!(mid > t && mid < next);
    }

    #[test]
    fn test_next_fire_daily() {
        let t = local_ms(2030, 6, 14, 10, 20);
        let next = next_cron_run_ms("0 9 * * *", t);
        assert_eq!(next, local_ms(2030, 6, 15, 9, 0));
    }

    #[test]
    fn test_dom_dow_or_quirk_when_both_restricted() {
        // 2030-06-14 is a Friday; "13th of month OR Friday" fires on the
        // 14th because the weekday matches even though the day does not.
        let t = local_ms(2030, 6, 13, 23, 59);
        let next = next_cron_run_ms("0 0 13 * 5", t);
        assert_eq!(next, local_ms(2030, 6, 14, 0, 0));
    }

    #[test]
    fn test_dom_restricted_dow_wildcard() {
        let t = local_ms(2030, 6, 14, 0, 0);
        let next = next_cron_run_ms("0 0 20 * *", t);
        assert_eq!(next, local_ms(2030, 6, 20, 0, 0));
    }

    #[test]
    fn test_invalid_expr_yields_zero() {
        assert_eq!(next_cron_run_ms("not a cron", now_ms()), 0);
    }

    #[test]
    fn test_compute_next_run_kinds() {
        let now = 1_000_000;
        assert_eq!(compute_next_run_ms(&CronSchedule::at(now + 500), now), now + 500);
        assert_eq!(compute_next_run_ms(&CronSchedule::at(now - 500), now), 0);
        assert_eq!(compute_next_run_ms(&CronSchedule::every(60_000), now), now + 60_000);
        assert_eq!(compute_next_run_ms(&CronSchedule::every(0), now), 0);
    }

    #[test]
    fn test_store_roundtrip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let service = CronService::new(&path);
        let job = service.add_job(
            "morning check",
            CronSchedule::cron("0 9 * * 1-5"),
            "check the queue",
            true,
            "telegram",
            "42",
            false,
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["jobs"][0]["id"], job.id.as_str());
        assert_eq!(parsed["jobs"][0]["schedule"]["kind"], "cron");
        assert_eq!(parsed["jobs"][0]["schedule"]["expr"], "0 9 * * 1-5");
        assert_eq!(parsed["jobs"][0]["payload"]["deliver"], true);
        assert_eq!(parsed["jobs"][0]["payload"]["to"], "42");
        assert_eq!(parsed["jobs"][0]["deleteAfterRun"], false);
        assert!(parsed["jobs"][0]["state"]["nextRunAtMs"].as_i64().unwrap() > 0);

        // Reload sees the same job.
        let reloaded = CronService::new(&path);
        let jobs = reloaded.list_jobs(true);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "morning check");
        assert_eq!(jobs[0].payload.message, "check the queue");
    }

    #[test]
    fn test_disable_clears_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let service = CronService::new(dir.path().join("jobs.json"));
        let job = service.add_job("j", CronSchedule::every(60_000), "m", false, "", "", false);
        let disabled = service.enable_job(&job.id, false).unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.state.next_run_at_ms, 0);

        let enabled = service.enable_job(&job.id, true).unwrap();
        assert!(enabled.state.next_run_at_ms > 0);
    }

    #[test]
    fn test_remove_job() {
        let dir = tempfile::tempdir().unwrap();
        let service = CronService::new(dir.path().join("jobs.json"));
        let job = service.add_job("j", CronSchedule::every(60_000), "m", false, "", "", false);
        assert!(service.remove_job(&job.id));
        assert!(!service.remove_job(&job.id));
        assert!(service.list_jobs(true).is_empty());
    }
}

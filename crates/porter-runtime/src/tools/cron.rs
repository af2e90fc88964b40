//! Schedule reminders and recurring tasks through the cron service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use porter_core::{Result, Tool, ToolContext};
use serde_json::{json, Value};

use crate::scheduler::{CronSchedule, CronService};

pub struct CronTool {
    cron: Arc<CronService>,
}

impl CronTool {
    pub fn new(cron: Arc<CronService>) -> Self {
        Self { cron }
    }

    fn parse_iso_to_ms(text: &str) -> i64 {
        let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") else {
            return 0;
        };
        Local
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.timestamp_millis())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }
    fn description(&self) -> &str {
        "Schedule reminders and recurring tasks (actions: add, list, remove)"
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "list", "remove"] },
                "message": { "type": "string" },
                "every_seconds": { "type": "integer" },
                "cron_expr": { "type": "string" },
                "at": { "type": "string" },
                "job_id": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<String> {
        let action = args["action"].as_str().unwrap_or_default();

        if action == "list" {
            let jobs = self.cron.list_jobs(true);
            if jobs.is_empty() {
                return Ok("No scheduled jobs.".to_string());
            }
            let mut out = String::from("Scheduled jobs:\n");
            for job in &jobs {
                out.push_str(&format!(
                    "- {} (id: {}, {})\n",
                    job.name, job.id, job.schedule.kind
                ));
            }
            return Ok(out.trim().to_string());
        }

        if action == "remove" {
            let id = args["job_id"].as_str().unwrap_or_default();
            if id.is_empty() {
                return Ok("Error: job_id is required for remove".to_string());
            }
            return Ok(if self.cron.remove_job(id) {
                format!("Removed job {id}")
            } else {
                format!("Job {id} not found")
            });
        }

        if action == "add" {
            let message = args["message"].as_str().unwrap_or_default();
            if message.is_empty() {
                return Ok("Error: message is required for add".to_string());
            }

            // Source precedence: every_seconds first, then cron_expr, then at.
            let mut delete_after = false;
            let schedule = if let Some(every) = args["every_seconds"].as_i64() {
                CronSchedule::every(every * 1000)
            } else if let Some(expr) =
                args["cron_expr"].as_str().map(str::trim).filter(|e| !e.is_empty())
            {
                CronSchedule::cron(expr)
            } else if let Some(at) = args["at"].as_str() {
                let at_ms = Self::parse_iso_to_ms(at);
                if at_ms <= 0 {
                    return Ok(
                        "Error: invalid --at datetime (expected YYYY-MM-DDTHH:MM:SS)".to_string()
                    );
                }
                delete_after = true;
                CronSchedule::at(at_ms)
            } else {
                return Ok("Error: either every_seconds, cron_expr, or at is required".to_string());
            };

            let name: String = message.chars().take(30).collect();
            let job = self.cron.add_job(
                &name,
                schedule,
                message,
                true,
                &ctx.channel,
                &ctx.chat_id,
                delete_after,
            );
            return Ok(format!("Created job '{}' (id: {})", job.name, job.id));
        }

        Ok("Error: unknown cron action".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, CronTool, Arc<CronService>) {
        let dir = tempfile::tempdir().unwrap();
        let cron = Arc::new(CronService::new(dir.path().join("jobs.json")));
        let tool = CronTool::new(Arc::clone(&cron));
        (dir, tool, cron)
    }

    #[tokio::test]
    async fn test_add_every_then_list_then_remove() {
        let (_dir, tool, cron) = setup();
        let ctx = ToolContext::new("telegram", "42");

        let out = tool
            .execute(
                &json!({"action": "add", "message": "water the plants", "every_seconds": 3600}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.starts_with("Created job 'water the plants'"));

        let jobs = cron.list_jobs(true);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].schedule.kind, "every");
        assert_eq!(jobs[0].schedule.every_ms, 3_600_000);
        assert_eq!(jobs[0].payload.channel, "telegram");
        assert_eq!(jobs[0].payload.to, "42");
        assert!(jobs[0].payload.deliver);

        let listed = tool
            .execute(&json!({"action": "list"}), &ctx)
            .await
            .unwrap();
        assert!(listed.contains("water the plants"));

        let id = jobs[0].id.clone();
        let removed = tool
            .execute(&json!({"action": "remove", "job_id": id}), &ctx)
            .await
            .unwrap();
        assert!(removed.starts_with("Removed job"));
    }

    #[tokio::test]
    async fn test_every_seconds_takes_precedence_over_cron_expr() {
        let (_dir, tool, cron) = setup();
        tool.execute(
            &json!({
                "action": "add",
                "message": "both supplied",
                "every_seconds": 60,
                "cron_expr": "0 9 * * *"
            }),
            &ToolContext::default(),
        )
        .await
        .unwrap();

        let jobs = cron.list_jobs(true);
        assert_eq!(jobs[0].schedule.kind, "every");
    }

    #[tokio::test]
    async fn test_at_job_marks_delete_after_run() {
        let (_dir, tool, cron) = setup();
        let out = tool
            .execute(
                &json!({"action": "add", "message": "one shot", "at": "2030-01-01T00:00:00"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Created job"));
        let jobs = cron.list_jobs(true);
        assert_eq!(jobs[0].schedule.kind, "at");
        assert!(jobs[0].delete_after_run);
    }

    #[tokio::test]
    async fn test_invalid_at_datetime() {
        let (_dir, tool, _cron) = setup();
        let out = tool
            .execute(
                &json!({"action": "add", "message": "m", "at": "tomorrow"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Error: invalid --at datetime"));
    }
}

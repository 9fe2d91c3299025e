// Daily driver for the grace-period check. Sleeps until the configured
// UTC hour, runs one pass, repeats. Mutual exclusion against overlapping
// passes lives in GracePeriodService::run_check.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

use super::service::GracePeriodService;

pub struct GracePeriodScheduler {
    service: Arc<GracePeriodService>,
    /// UTC hour (0-23) to run at
    execution_hour: u32,
}

impl GracePeriodScheduler {
    pub fn new(service: Arc<GracePeriodService>, execution_hour: u32) -> Self {
        Self {
            service,
            execution_hour: execution_hour % 24,
        }
    }

    /// Start the scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let execution_hour = self.execution_hour;

        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next_execution = Self::calculate_next_daily_execution(now, execution_hour);
                let wait = next_execution.signed_duration_since(now);

                if wait.num_seconds() > 0 {
                    info!(
                        "Next grace-period check scheduled for {} UTC",
                        next_execution.format("%Y-%m-%d %H:%M:%S")
                    );
                    tokio::time::sleep(Duration::from_secs(wait.num_seconds() as u64)).await;
                }

                match service.run_check().await {
                    Ok(summary) if summary.skipped => {
                        info!("Grace-period pass skipped (previous run still in progress)")
                    }
                    Ok(summary) => info!(
                        "Grace-period pass: {} stores, {} warnings, {} activations",
                        summary.evaluated, summary.warnings_sent, summary.fees_activated
                    ),
                    Err(e) => error!("Grace-period pass failed: {:?}", e),
                }
            }
        })
    }

    /// Next occurrence of the execution hour, today or tomorrow
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let today = now
            .date_naive()
            .and_hms_opt(execution_hour, 0, 0)
            .unwrap_or_else(|| now.date_naive().and_hms_opt(0, 0, 0).unwrap());
        let today_dt = Utc.from_utc_datetime(&today);

        if today_dt <= now {
            let tomorrow = (now.date_naive() + chrono::Duration::days(1))
                .and_hms_opt(execution_hour, 0, 0)
                .unwrap_or_else(|| now.date_naive().and_hms_opt(0, 0, 0).unwrap());
            Utc.from_utc_datetime(&tomorrow)
        } else {
            today_dt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_calculate_next_daily_execution() {
        // Current time: 2025-03-01 10:00:00 UTC
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();

        // Execution hour still ahead today
        let next = GracePeriodScheduler::calculate_next_daily_execution(now, 14);
        assert_eq!(next.hour(), 14);
        assert_eq!(next.day(), 1);

        // Execution hour already passed: tomorrow
        let next = GracePeriodScheduler::calculate_next_daily_execution(now, 2);
        assert_eq!(next.hour(), 2);
        assert_eq!(next.day(), 2);
    }
}

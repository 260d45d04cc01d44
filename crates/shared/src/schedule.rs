use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{RunOutcome, Trigger};
use crate::trigger::Controller;

/// Fixed wall-clock fire times in one timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    times: Vec<NaiveTime>,
    timezone: Tz,
}

impl Schedule {
    /// Times are sorted and de-duplicated.
    pub fn new(mut times: Vec<NaiveTime>, timezone: Tz) -> Result<Self> {
        if times.is_empty() {
            anyhow::bail!("Schedule needs at least one time of day");
        }
        times.sort();
        times.dedup();
        Ok(Self { times, timezone })
    }

    /// Parse `"01:00,04:00,21:30"` and an IANA zone name like `Asia/Bangkok`.
    pub fn parse(times: &str, timezone: &str) -> Result<Self> {
        let timezone: Tz = timezone
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", timezone, e))?;

        let times = times
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                NaiveTime::parse_from_str(t, "%H:%M")
                    .with_context(|| format!("Invalid schedule time '{}', expected HH:MM", t))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(times, timezone)
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First fire time strictly after `now`.
    ///
    /// Local times that don't exist (DST gaps) are skipped; ambiguous ones
    /// fire at the earlier instant.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.timezone).date_naive();

        for offset in 0..=2 {
            let day = today + Duration::days(offset);
            for time in &self.times {
                let fire = self
                    .timezone
                    .from_local_datetime(&day.and_time(*time))
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc));
                if let Some(fire) = fire {
                    if fire > now {
                        return fire;
                    }
                }
            }
        }

        // Only reachable if every configured time falls in a gap for three
        // days straight; try again in an hour.
        now + Duration::hours(1)
    }

    pub fn describe(&self) -> String {
        let times: Vec<String> = self
            .times
            .iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect();
        format!("{} ({})", times.join(", "), self.timezone.name())
    }
}

/// Fire the pipeline at every scheduled time, forever.
pub async fn run_scheduler(controller: Arc<Controller>, schedule: Schedule) {
    info!(schedule = %schedule.describe(), "Scheduler started");

    loop {
        let now = Utc::now();
        let next = schedule.next_after(now);
        controller.set_next_scheduled(Some(next));
        info!(next = %next.with_timezone(&schedule.timezone()), "Next scheduled run");

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        match controller.run_now(Trigger::Scheduled).await {
            Ok(run) if run.outcome == RunOutcome::LedgerDefect => {
                error!(unconfirmed = ?run.unconfirmed_ids(), "Scheduled run hit a ledger write failure");
            }
            Ok(run) => info!(summary = %run.summary_line(), "Scheduled run complete"),
            Err(e) => warn!(error = %e, "Skipping scheduled run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bangkok() -> Schedule {
        Schedule::parse("21:00, 01:00,04:00,08:00,12:00,16:00,04:00", "Asia/Bangkok").unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_sorts_and_dedups() {
        let schedule = bangkok();
        assert_eq!(schedule.times().len(), 6);
        assert_eq!(schedule.times()[0], NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        assert_eq!(
            schedule.describe(),
            "01:00, 04:00, 08:00, 12:00, 16:00, 21:00 (Asia/Bangkok)"
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Schedule::parse("25:00", "Asia/Bangkok").is_err());
        assert!(Schedule::parse("08:00", "Mars/Olympus").is_err());
        assert!(Schedule::parse(" , ", "UTC").is_err());
    }

    #[test]
    fn test_next_after_same_day() {
        // 02:30 UTC is 09:30 in Bangkok (UTC+7); next is 12:00 local = 05:00 UTC
        let next = bangkok().next_after(utc(2025, 3, 1, 2, 30));
        assert_eq!(next, utc(2025, 3, 1, 5, 0));
    }

    #[test]
    fn test_next_after_is_strict() {
        // Exactly 12:00 local should move on to 16:00 local
        let next = bangkok().next_after(utc(2025, 3, 1, 5, 0));
        assert_eq!(next, utc(2025, 3, 1, 9, 0));
    }

    #[test]
    fn test_next_after_rolls_to_tomorrow() {
        // 22:00 local on Mar 1 -> 01:00 local Mar 2 = 18:00 UTC Mar 1
        let next = bangkok().next_after(utc(2025, 3, 1, 15, 0));
        assert_eq!(next, utc(2025, 3, 1, 18, 0));
    }

    #[test]
    fn test_next_after_skips_dst_gap() {
        // 02:30 doesn't exist in New York on 2025-03-09
        let schedule = Schedule::parse("02:30", "America/New_York").unwrap();
        let next = schedule.next_after(utc(2025, 3, 9, 5, 0));
        // Next real 02:30 is Mar 10 02:30 EDT = 06:30 UTC
        assert_eq!(next, utc(2025, 3, 10, 6, 30));
    }
}

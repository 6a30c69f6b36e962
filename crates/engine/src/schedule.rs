//! Send-time computation: enrollment anchors, send windows, and per-step
//! due times.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};

use drip_core::config::SendWindowConfig;
use drip_core::types::{CampaignDefinition, CampaignStep, StartMode};
use drip_core::{DripError, DripResult};

/// Daily send window expressed in a fixed UTC offset.
#[derive(Debug, Clone)]
pub struct SendSchedule {
    start: Duration,
    end: Duration,
    utc_offset: Duration,
}

impl SendSchedule {
    pub fn new(start_hour: u32, end_hour: u32, utc_offset_minutes: i32) -> DripResult<Self> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(DripError::Config(format!(
                "invalid send window {start_hour}..{end_hour}"
            )));
        }
        if utc_offset_minutes.abs() >= 24 * 60 {
            return Err(DripError::Config(format!(
                "invalid utc offset {utc_offset_minutes} minutes"
            )));
        }
        Ok(Self {
            start: Duration::hours(i64::from(start_hour)),
            end: Duration::hours(i64::from(end_hour)),
            utc_offset: Duration::minutes(i64::from(utc_offset_minutes)),
        })
    }

    pub fn from_config(config: &SendWindowConfig) -> DripResult<Self> {
        Self::new(config.start_hour, config.end_hour, config.utc_offset_minutes)
    }

    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.naive_utc() + self.utc_offset
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        Utc.from_utc_datetime(&(local - self.utc_offset))
    }

    /// Earliest instant at or after `now` inside the send window: `now`
    /// itself when the window is open, otherwise the next opening.
    pub fn next_window(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = self.to_local(now);
        let midnight = local.date().and_time(NaiveTime::MIN);
        let open = midnight + self.start;
        let close = midnight + self.end;

        if local < open {
            self.to_utc(open)
        } else if local < close {
            now
        } else {
            self.to_utc(open + Duration::days(1))
        }
    }

    /// Schedule anchor of a new enrollment; stored as `started_at`.
    pub fn anchor(&self, mode: StartMode, now: DateTime<Utc>) -> DateTime<Utc> {
        match mode {
            StartMode::Immediate => now,
            StartMode::NextWindow => self.next_window(now),
        }
    }

    /// Due time of `step` for an enrollment anchored at `anchor`. Never
    /// earlier than the anchor.
    pub fn step_time(&self, anchor: DateTime<Utc>, step: &CampaignStep) -> DateTime<Utc> {
        let days = Duration::days(i64::from(step.day_offset));
        let at = match step.time_of_day {
            None => anchor + days,
            Some(time) => {
                let local_day = (self.to_local(anchor) + days).date();
                self.to_utc(local_day.and_time(time))
            }
        };
        at.max(anchor)
    }

    /// Due time of the step at `cursor`, or `None` once the cursor has run
    /// past the last active step.
    pub fn next_send_at(
        &self,
        anchor: DateTime<Utc>,
        campaign: &CampaignDefinition,
        cursor: u32,
    ) -> Option<DateTime<Utc>> {
        campaign
            .step_at(cursor)
            .map(|step| self.step_time(anchor, step))
    }
}

impl Default for SendSchedule {
    fn default() -> Self {
        Self {
            start: Duration::hours(9),
            end: Duration::hours(17),
            utc_offset: Duration::zero(),
        }
    }
}

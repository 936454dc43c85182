use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusinessHours {
    tz: Tz,
    start_hour: u32,
    end_hour: u32,
}

impl BusinessHours {
    pub fn new(timezone: &str, start_hour: u32, end_hour: u32) -> Result<Self, String> {
        let tz: Tz = timezone
            .parse()
            .map_err(|e| format!("invalid timezone '{timezone}': {e}"))?;
        if end_hour > 24 || start_hour >= end_hour {
            return Err(format!(
                "invalid business window {start_hour}..{end_hour}; need start < end <= 24"
            ));
        }
        Ok(Self {
            tz,
            start_hour,
            end_hour,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn label(&self) -> String {
        format!("{}h-{}h", self.start_hour, self.end_hour)
    }

    pub fn is_business_moment(&self, t: DateTime<Utc>) -> bool {
        let local = t.with_timezone(&self.tz);
        is_weekday(local.weekday())
            && local.hour() >= self.start_hour
            && local.hour() < self.end_hour
    }

    pub fn business_elapsed(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Duration {
        let (Some(from), Some(to)) = (from, to) else {
            return Duration::zero();
        };
        if to <= from {
            return Duration::zero();
        }

        let mut total = Duration::zero();
        let mut day = from.with_timezone(&self.tz).date_naive();
        let last_day = to.with_timezone(&self.tz).date_naive();
        while day <= last_day {
            if let Some((open, close)) = self.window(day) {
                let start = open.max(from);
                let end = close.min(to);
                if end > start {
                    total += end - start;
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        total
    }

    fn window(&self, day: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !is_weekday(day.weekday()) {
            return None;
        }
        let open = self.local_instant(day, self.start_hour)?;
        let close = self.local_instant(day, self.end_hour)?;
        Some((open, close))
    }

    fn local_instant(&self, day: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
        let naive: NaiveDateTime = if hour == 24 {
            day.succ_opt()?.and_hms_opt(0, 0, 0)?
        } else {
            day.and_hms_opt(hour, 0, 0)?
        };
        // A wall-clock hour skipped by a DST jump opens at the next valid instant.
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .map(|v| v.with_timezone(&Utc))
    }
}

fn is_weekday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

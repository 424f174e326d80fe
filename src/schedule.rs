use chrono::NaiveDate;

/// Once-per-day trigger for the broadcast subscription update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DailySchedule {
    last_run: Option<NaiveDate>,
}

impl DailySchedule {
    /// Starting with `last_run = today` skips the run on the day the bot starts.
    pub(crate) fn new(last_run: Option<NaiveDate>) -> Self {
        Self { last_run }
    }

    pub(crate) fn due(&self, today: NaiveDate) -> bool {
        self.last_run != Some(today)
    }

    /// Record the run when it is spawned, not when it completes.
    pub(crate) fn mark_ran(&mut self, today: NaiveDate) {
        self.last_run = Some(today);
    }

    pub(crate) fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn fires_at_most_once_per_day() {
        let mut schedule = DailySchedule::new(None);
        let mut fired = 0;
        for _ in 0..1000 {
            if schedule.due(day(1)) {
                schedule.mark_ran(day(1));
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert!(schedule.due(day(2)));
    }

    #[test]
    fn start_date_suppresses_first_day() {
        let schedule = DailySchedule::new(Some(day(3)));
        assert!(!schedule.due(day(3)));
        assert!(schedule.due(day(4)));
        assert_eq!(schedule.last_run(), Some(day(3)));
    }
}

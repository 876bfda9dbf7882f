//! Various formatting utilities.

use std::fmt;

use chrono::TimeDelta;


/// Common human-readable date format.
pub const DATE_FORMAT: &str = "%a %b %e %T %Y";

/// Format a time delta as a rough human-readable age, such as "3 weeks ago".
#[derive(Debug)]
pub struct TimeDeltaFmt(pub TimeDelta);

impl fmt::Display for TimeDeltaFmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        let days = self.0.num_days();

        // Months and years are approximated.
        let (count, unit) = match days {
            365.. => (days / 365, "year"),
            30.. => (days / 30, "month"),
            7.. => (days / 7, "week"),
            1.. => (days, "day"),
            _ if self.0.num_hours() > 0 => (self.0.num_hours(), "hour"),
            _ => (self.0.num_minutes().max(0), "minute"),
        };

        let plural = if count == 1 { "" } else { "s" };
        write!(f, "{count} {unit}{plural} ago")

    }
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn time_delta() {
        assert_eq!(TimeDeltaFmt(TimeDelta::days(800)).to_string(), "2 years ago");
        assert_eq!(TimeDeltaFmt(TimeDelta::days(31)).to_string(), "1 month ago");
        assert_eq!(TimeDeltaFmt(TimeDelta::days(15)).to_string(), "2 weeks ago");
        assert_eq!(TimeDeltaFmt(TimeDelta::hours(5)).to_string(), "5 hours ago");
        assert_eq!(TimeDeltaFmt(TimeDelta::minutes(-3)).to_string(), "0 minutes ago");
    }

}

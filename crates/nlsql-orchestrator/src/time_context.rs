//! Wall-clock context in the target timezone, rendered into prompt tokens

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

/// Date tokens the model is told to use for time-partitioned tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeTokens {
    /// `YYYY-MM-DD`
    pub iso_date: String,
    /// Two-digit year followed by two-digit month, e.g. `2505`.
    pub yymm: String,
    /// Abbreviation of the zone at that instant, e.g. `KST`.
    pub zone_abbreviation: String,
    /// IANA name, e.g. `Asia/Seoul`.
    pub zone_name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeContext {
    instant: DateTime<Tz>,
}

impl TimeContext {
    pub fn now(zone: Tz) -> Self {
        Self::at(Utc::now(), zone)
    }

    pub fn at(instant: DateTime<Utc>, zone: Tz) -> Self {
        Self { instant: instant.with_timezone(&zone) }
    }

    pub fn local_date(&self) -> NaiveDate {
        self.instant.date_naive()
    }

    pub fn tokens(&self) -> TimeTokens {
        let date = self.local_date();
        TimeTokens {
            iso_date: date.format("%Y-%m-%d").to_string(),
            yymm: format!("{:02}{:02}", date.year().rem_euclid(100), date.month()),
            zone_abbreviation: self.instant.format("%Z").to_string(),
            zone_name: self.instant.timezone().name().to_string(),
        }
    }

    /// Time block placed first in every context bundle.
    pub fn render_block(&self, partition_table_prefix: &str) -> String {
        let t = self.tokens();
        let mut block = format!(
            "[System Context - TIMEZONE: {} ({})]\n\
             - Today's Date: {} (Format: YYYY-MM-DD)\n\
             - Current Month Suffix: {}",
            t.zone_abbreviation, t.zone_name, t.iso_date, t.yymm
        );
        if !partition_table_prefix.is_empty() {
            block.push_str(&format!(
                "\n- Real-time Table for Today: {prefix}{yymm} (monthly partition for the current month)\n\
                 - Instruction: For questions about \"today\", \"now\" or \"real-time\" totals, use '{prefix}{yymm}' \
                 and compare dates in YYYY-MM-DD format.",
                prefix = partition_table_prefix,
                yymm = t.yymm
            ));
        }
        block
    }
}

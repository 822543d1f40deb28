//! Civil UTC time and the packed FAT date/time fields.
//!
//! FAT dates count years from 1980 in 7 bits, so representable years are 1980..=2107.
//! Times have 2-second granularity.

use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: i64 = 86_400;
const FAT_EPOCH_YEAR: u16 = 1980;
const FAT_LAST_YEAR: u16 = 2107;
/// 2107-12-31 23:59:59 UTC.
const FAT_LAST_UNIX: i64 = 4_354_819_199;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

const MONTH_DAYS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn days_in_year(year: i64) -> i64 {
    if is_leap_year(year) { 366 } else { 365 }
}

fn days_in_month(year: i64, month: i64) -> i64 {
    let mut days = MONTH_DAYS[(month - 1) as usize];
    if month == 2 && is_leap_year(year) {
        days += 1;
    }
    days
}

impl DateTime {
    /// Seconds since the Unix epoch. Times before 1970 clamp to the epoch and times
    /// past the last FAT year clamp to its final second.
    pub fn from_unix(secs: i64) -> Self {
        let secs = secs.clamp(0, FAT_LAST_UNIX);
        let mut days = secs / SECS_PER_DAY;
        let rem = secs % SECS_PER_DAY;

        let mut year = 1970;
        while days >= days_in_year(year) {
            days -= days_in_year(year);
            year += 1;
        }
        let mut month = 1;
        while days >= days_in_month(year, month) {
            days -= days_in_month(year, month);
            month += 1;
        }

        DateTime {
            year: year as u16,
            month: month as u8,
            day: days as u8 + 1,
            hour: (rem / 3600) as u8,
            minute: (rem % 3600 / 60) as u8,
            second: (rem % 60) as u8,
        }
    }

    pub fn to_unix(&self) -> i64 {
        let year = self.year as i64;
        let mut days: i64 = (1970..year).map(days_in_year).sum();
        let month = (self.month as i64).clamp(1, 12);
        days += (1..month).map(|m| days_in_month(year, m)).sum::<i64>();
        days += (self.day as i64).max(1) - 1;
        days * SECS_PER_DAY
            + self.hour as i64 * 3600
            + self.minute as i64 * 60
            + self.second as i64
    }

    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);
        Self::from_unix(secs)
    }

    /// `day | month << 5 | (year - 1980) << 9`, year clamped to the FAT range.
    pub fn fat_date(&self) -> u16 {
        let year = self.year.clamp(FAT_EPOCH_YEAR, FAT_LAST_YEAR) - FAT_EPOCH_YEAR;
        self.day as u16 | (self.month as u16) << 5 | year << 9
    }

    /// `second / 2 | minute << 5 | hour << 11`.
    pub fn fat_time(&self) -> u16 {
        (self.second / 2) as u16 | (self.minute as u16) << 5 | (self.hour as u16) << 11
    }

    /// Decodes a packed date and time. A zero date (never set) decodes as 1980-01-01.
    pub fn from_fat(date: u16, time: u16) -> Self {
        DateTime {
            year: FAT_EPOCH_YEAR + (date >> 9),
            month: (((date >> 5) & 0x0F) as u8).max(1),
            day: ((date & 0x1F) as u8).max(1),
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }

    /// `DD-MM-YYYY HH:MM`, the activity log's timestamp column.
    pub fn log_stamp(&self) -> String {
        format!("{:02}-{:02}-{:04} {:02}:{:02}",
                self.day, self.month, self.year, self.hour, self.minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_1970_01_01() {
        let dt = DateTime::from_unix(0);
        assert_eq!((dt.year, dt.month, dt.day, dt.hour), (1970, 1, 1, 0));
    }

    #[test]
    fn leap_day_2024() {
        // 2024-02-29 12:34:56 UTC
        let dt = DateTime::from_unix(1_709_210_096);
        assert_eq!(dt, DateTime { year: 2024, month: 2, day: 29, hour: 12, minute: 34, second: 56 });
        assert_eq!(dt.to_unix(), 1_709_210_096);
    }

    #[test]
    fn fat_packing_matches_layout() {
        let dt = DateTime { year: 2000, month: 6, day: 15, hour: 13, minute: 45, second: 31 };
        assert_eq!(dt.fat_date(), 15 | 6 << 5 | 20 << 9);
        assert_eq!(dt.fat_time(), 15 | 45 << 5 | 13 << 11);
        let back = DateTime::from_fat(dt.fat_date(), dt.fat_time());
        assert_eq!(back.second, 30);
        assert_eq!((back.year, back.month, back.day, back.hour, back.minute), (2000, 6, 15, 13, 45));
    }

    #[test]
    fn huge_times_clamp_to_last_fat_second() {
        let end = DateTime { year: 2107, month: 12, day: 31, hour: 23, minute: 59, second: 59 };
        assert_eq!(DateTime::from_unix(i64::MAX), end);
        assert_eq!(DateTime::from_unix(FAT_LAST_UNIX), end);
        assert_eq!(end.to_unix(), FAT_LAST_UNIX);
    }

    #[test]
    fn years_before_1980_clamp() {
        let dt = DateTime::from_unix(0);
        assert_eq!(dt.fat_date() >> 9, 0);
    }

    #[test]
    fn zero_date_decodes_to_fat_epoch() {
        let dt = DateTime::from_fat(0, 0);
        assert_eq!((dt.year, dt.month, dt.day), (1980, 1, 1));
        assert_eq!(dt.to_unix(), 315_532_800);
    }

    #[test]
    fn log_stamp_format() {
        let dt = DateTime { year: 2023, month: 3, day: 7, hour: 9, minute: 5, second: 0 };
        assert_eq!(dt.log_stamp(), "07-03-2023 09:05");
    }
}

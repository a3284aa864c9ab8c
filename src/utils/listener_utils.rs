#![forbid(unsafe_code)]

use path_absolutize::Absolutize;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::fmt;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::utils::errors::Errors;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Format shared by the access log writer and the traffic analyser.
pub const LOG_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ***************************************************************************
// GENERAL PUBLIC FUNCTIONS
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_absolute_path:
// ---------------------------------------------------------------------------
/** Replace tilde (~) and environment variable values in a path name and
 * then construct the absolute path name.  The difference between
 * absolutize and standard canonicalize methods is that absolutize does not
 * care about whether the file exists and what the file really is, which
 * matters here because the access log usually doesn't exist on first start.
 */
pub fn get_absolute_path(path: &str) -> String {
    // Replace ~ and environment variable values if possible.
    // On error, return the string version of the original path.
    let s = match shellexpand::full(path) {
        Ok(x) => x,
        Err(_) => return path.to_owned(),
    };

    // Convert to absolute path if necessary.
    // Return original input on error.
    let p = Path::new(s.deref());
    let p1 = match p.absolutize() {
        Ok(x) => x,
        Err(_) => return path.to_owned(),
    };
    let p2 = match p1.to_str() {
        Some(x) => x,
        None => return path.to_owned(),
    };

    p2.to_owned()
}

// ---------------------------------------------------------------------------
// ensure_parent_dir:
// ---------------------------------------------------------------------------
/** Create the directory that will contain the file at path, including any
 * missing ancestors.  A path without a parent component is a no-op.
 */
pub fn ensure_parent_dir(path: &Path) -> Result<(), Errors> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            fs::create_dir_all(dir)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// parse_timezone:
// ---------------------------------------------------------------------------
/** Look up an IANA zone name such as CET or Europe/Warsaw.  Zones that
 * observe daylight saving time switch offsets on their own.
 */
pub fn parse_timezone(name: &str) -> Result<Tz, Errors> {
    name.trim().parse::<Tz>()
        .map_err(|e| Errors::InvalidTimezone(format!("{} ({})", name, e)))
}

// ---------------------------------------------------------------------------
// timestamp_in:
// ---------------------------------------------------------------------------
/** Get the current time expressed in the given zone. */
pub fn timestamp_in(tz: &Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(tz)
}

// ---------------------------------------------------------------------------
// timestamp_str:
// ---------------------------------------------------------------------------
/** Get the current time in the given zone formatted for the access log,
 * which looks like this:  2024-06-24 04:32:27
 */
pub fn timestamp_str(tz: &Tz) -> String {
    timestamp_to_log_str(&timestamp_in(tz))
}

// ---------------------------------------------------------------------------
// timestamp_to_log_str:
// ---------------------------------------------------------------------------
pub fn timestamp_to_log_str<Z>(ts: &DateTime<Z>) -> String
where
    Z: TimeZone,
    Z::Offset: fmt::Display,
{
    ts.format(LOG_TS_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// log_str_to_timestamp:
// ---------------------------------------------------------------------------
/** Convert an access log timestamp (ex: 2024-06-24 04:32:27) to a naive
 * datetime.  The zone is not part of the string, so comparisons are only
 * meaningful against times expressed in the zone the log was written with.
 */
pub fn log_str_to_timestamp(ts: &str) -> Result<NaiveDateTime, Errors> {
    NaiveDateTime::parse_from_str(ts.trim(), LOG_TS_FORMAT)
        .map_err(|_| Errors::InvalidTimestamp(ts.to_string()))
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Offset, Timelike};

    #[test]
    fn parses_zone_names() {
        assert_eq!(parse_timezone("CET").unwrap(), Tz::CET);
        assert_eq!(parse_timezone(" Europe/Warsaw ").unwrap(), Tz::Europe__Warsaw);
        assert_eq!(parse_timezone("UTC").unwrap(), Tz::UTC);
    }

    #[test]
    fn rejects_unknown_zones() {
        for bad in ["+01:00", "Mars/Olympus", ""] {
            assert!(matches!(parse_timezone(bad), Err(Errors::InvalidTimezone(_))), "accepted {:?}", bad);
        }
    }

    #[test]
    fn cet_follows_daylight_saving() {
        // Summer time is in effect until the last Sunday of October.
        let summer = Utc.with_ymd_and_hms(2026, 10, 17, 13, 40, 19).unwrap().with_timezone(&Tz::CET);
        assert_eq!(timestamp_to_log_str(&summer), "2026-10-17 15:40:19");

        let winter = Utc.with_ymd_and_hms(2026, 1, 15, 13, 40, 19).unwrap().with_timezone(&Tz::CET);
        assert_eq!(timestamp_to_log_str(&winter), "2026-01-15 14:40:19");
    }

    #[test]
    fn log_timestamp_round_trip() {
        let ts = Tz::CET.with_ymd_and_hms(2024, 6, 24, 4, 32, 27).unwrap();
        let s = timestamp_to_log_str(&ts);
        assert_eq!(s, "2024-06-24 04:32:27");

        let naive = log_str_to_timestamp(&s).unwrap();
        assert_eq!(naive.year(), 2024);
        assert_eq!(naive.hour(), 4);
        assert_eq!(naive.second(), 27);
    }

    #[test]
    fn current_timestamp_uses_requested_zone() {
        let tz = parse_timezone("Asia/Tokyo").unwrap();
        assert_eq!(timestamp_in(&tz).offset().fix().local_minus_utc(), 9 * 3600);
        assert_eq!(timestamp_str(&tz).len(), "2024-06-24 04:32:27".len());
    }

    #[test]
    fn rejects_bad_log_timestamps() {
        assert!(log_str_to_timestamp("2024-06-24T04:32:27Z").is_err());
        assert!(log_str_to_timestamp("yesterday").is_err());
    }

    #[test]
    fn absolute_path_expands_relative_names() {
        let p = get_absolute_path("logs/server.log");
        assert!(Path::new(&p).is_absolute());
        assert!(p.ends_with("logs/server.log"));
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("a").join("b").join("server.log");
        ensure_parent_dir(&file).unwrap();
        assert!(file.parent().unwrap().is_dir());

        // No parent component at all.
        ensure_parent_dir(Path::new("server.log")).unwrap();
    }
}

//! Timestamps.
//!
//! A `time.Time` stores either a wall clock with a monotonic reading (bit 63
//! of `wall` set: 33 bits of seconds since 1885 in `wall`, nanoseconds since
//! process start in `ext`) or full seconds since year 1 in `ext`.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, SecondsFormat, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::trace;

use super::{Scalar, Value};

const WALL_HAS_MONOTONIC: u64 = 1 << 63;
const WALL_NSEC_SHIFT: u32 = 30;
/// Unix time of 1885-01-01T00:00:00Z, the epoch of the monotonic wall field.
const UNIX_OF_WALL_EPOCH: i64 = -2_682_288_000;

/// Time zone named by a `time.Location`.
enum Zone
{
    Utc,
    Local,
    Named(Tz),
}

impl Zone
{
    fn parse(name: &str) -> Option<Zone>
    {
        match name {
            "" | "UTC" => Some(Zone::Utc),
            "Local" => Some(Zone::Local),
            other => Tz::from_str(other).ok().map(Zone::Named),
        }
    }

    fn apply(&self, t: DateTime<Utc>) -> DateTime<FixedOffset>
    {
        match self {
            Zone::Utc => t.fixed_offset(),
            Zone::Local => t.with_timezone(&Local).fixed_offset(),
            Zone::Named(tz) => t.with_timezone(tz).fixed_offset(),
        }
    }
}

fn render(t: DateTime<FixedOffset>) -> String
{
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render a `time.Time` from its `wall` and `ext` fields.
fn format_wall(wall: u64, ext: i64, zone: &Zone) -> Option<String>
{
    if wall & WALL_HAS_MONOTONIC != 0 {
        let sec = ((wall << 1) >> (WALL_NSEC_SHIFT + 1)) as i64;
        let t = Utc.timestamp_opt(sec + UNIX_OF_WALL_EPOCH, 0).single()?;
        return Some(format!("{}, {ext:+}", render(zone.apply(t))));
    }
    let year_one = NaiveDate::from_ymd_opt(1, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let t = year_one.checked_add_signed(TimeDelta::try_seconds(ext)?)?;
    Some(render(zone.apply(Utc.from_utc_datetime(&t))))
}

impl Value
{
    /// Set the string rendering of a loaded `time.Time` struct. Leaves `value`
    /// unset if the fields were not loaded or the instant is out of range.
    pub(super) fn format_time(&mut self)
    {
        let wall = self.field_variable("wall").filter(|v| v.unreadable.is_none());
        let ext = self.field_variable("ext").filter(|v| v.unreadable.is_none());
        let (Some(wall), Some(ext)) = (
            wall.and_then(|v| v.value.as_ref()?.as_u64()),
            ext.and_then(|v| v.value.as_ref()?.as_i64()),
        ) else {
            return;
        };

        let zone = self
            .field_variable("loc")
            .filter(|loc| loc.unreadable.is_none())
            .and_then(|loc| loc.load_field_named("name"))
            .and_then(|name| name.string_value().and_then(|s| Zone::parse(&s)))
            .unwrap_or(Zone::Utc);

        match format_wall(wall, ext, &zone) {
            Some(s) => self.value = Some(Scalar::string(s)),
            None => trace!(name = %self.name, wall, ext, "timestamp out of range"),
        }
    }
}

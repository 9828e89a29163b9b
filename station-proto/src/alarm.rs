//! Debounced threshold alarms
//!
//! A reading only raises an alarm once it has stayed outside its limits for
//! longer than the tripping duration, counted from the last time the sensor
//! was seen inside them. Keeping `last_inside_limits` current is the job of
//! whoever stores the readings.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Alarm state pushed back to a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alarm {
    #[default]
    None,
    Low,
    High,
}

impl Alarm {
    /// Value written to the alarm characteristic
    pub fn wire_code(self) -> u8 {
        match self {
            Alarm::None => 0,
            Alarm::Low => 1,
            Alarm::High => 2,
        }
    }
}

impl TryFrom<u8> for Alarm {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Alarm::None),
            1 => Ok(Alarm::Low),
            2 => Ok(Alarm::High),
            other => Err(other),
        }
    }
}

/// Limits configured for one sensor of one station
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorLimits {
    pub lower_limit: Option<f64>,
    pub upper_limit: Option<f64>,
    #[serde(default, with = "duration_secs")]
    pub tripping_duration: Option<TimeDelta>,
    pub last_inside_limits: Option<DateTime<Utc>>,
}

impl SensorLimits {
    /// Whether `value` lies within the configured bounds (inclusive)
    pub fn contains(&self, value: f64) -> bool {
        self.lower_limit.is_none_or(|lo| value >= lo) && self.upper_limit.is_none_or(|hi| value <= hi)
    }
}

/// Decides the alarm for a single fresh reading.
///
/// Without a tripping duration or a last-inside timestamp nothing ever
/// alarms.
pub fn decide_alarm(value: f64, limits: &SensorLimits, now: DateTime<Utc>) -> Alarm {
    let (Some(tripping), Some(last_inside)) = (limits.tripping_duration, limits.last_inside_limits)
    else {
        return Alarm::None;
    };
    let tripped = now - last_inside > tripping;

    if limits.lower_limit.is_some_and(|lo| value < lo) && tripped {
        Alarm::Low
    } else if limits.upper_limit.is_some_and(|hi| value > hi) && tripped {
        Alarm::High
    } else {
        Alarm::None
    }
}

/// Tripping durations are kept as whole seconds on disk
mod duration_secs {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<TimeDelta>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(delta) => s.serialize_some(&delta.num_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TimeDelta>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(TimeDelta::seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn limits() -> SensorLimits {
        SensorLimits {
            lower_limit: Some(10.0),
            upper_limit: Some(20.0),
            tripping_duration: Some(TimeDelta::seconds(60)),
            last_inside_limits: Some(t0()),
        }
    }

    #[test]
    fn below_lower_limit_needs_tripping_time() {
        assert_eq!(decide_alarm(5.0, &limits(), t0() + TimeDelta::seconds(30)), Alarm::None);
        assert_eq!(decide_alarm(5.0, &limits(), t0() + TimeDelta::seconds(61)), Alarm::Low);
    }

    #[test]
    fn exactly_tripping_duration_does_not_alarm() {
        assert_eq!(decide_alarm(5.0, &limits(), t0() + TimeDelta::seconds(60)), Alarm::None);
    }

    #[test]
    fn inside_limits_never_alarms() {
        for secs in [0, 61, 3600, 86400] {
            assert_eq!(decide_alarm(15.0, &limits(), t0() + TimeDelta::seconds(secs)), Alarm::None);
        }
    }

    #[test]
    fn above_upper_limit() {
        assert_eq!(decide_alarm(25.0, &limits(), t0() + TimeDelta::seconds(61)), Alarm::High);
    }

    #[test]
    fn no_limits_never_alarm() {
        let mut limits = SensorLimits {
            last_inside_limits: Some(t0()),
            tripping_duration: Some(TimeDelta::seconds(1)),
            ..Default::default()
        };
        let later = t0() + TimeDelta::days(30);
        assert_eq!(decide_alarm(-1e9, &limits, later), Alarm::None);
        assert_eq!(decide_alarm(1e9, &limits, later), Alarm::None);

        limits.lower_limit = Some(0.0);
        limits.tripping_duration = None;
        assert_eq!(decide_alarm(-1.0, &limits, later), Alarm::None);
    }

    #[test]
    fn wire_codes() {
        assert_eq!(Alarm::None.wire_code(), 0);
        assert_eq!(Alarm::Low.wire_code(), 1);
        assert_eq!(Alarm::High.wire_code(), 2);
        assert_eq!(Alarm::try_from(2), Ok(Alarm::High));
        assert_eq!(Alarm::try_from(3), Err(3));
    }

    #[test]
    fn limits_contain_bounds() {
        assert!(limits().contains(10.0));
        assert!(limits().contains(20.0));
        assert!(!limits().contains(20.5));
        assert!(SensorLimits::default().contains(f64::MAX));
    }

    #[test]
    fn limits_store_tripping_as_seconds() {
        let json = serde_json::to_value(limits()).unwrap();
        assert_eq!(json["tripping_duration"], 60);
        let back: SensorLimits = serde_json::from_value(json).unwrap();
        assert_eq!(back, limits());
    }
}

//! Run cadence

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How often the pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Schedule {
    /// Run a single time and stop
    Once,

    /// Run every fixed interval
    Every(Duration),
}

impl Schedule {
    pub const HOURLY: Schedule = Schedule::Every(Duration::from_secs(60 * 60));
    pub const DAILY: Schedule = Schedule::Every(Duration::from_secs(24 * 60 * 60));
    pub const WEEKLY: Schedule = Schedule::Every(Duration::from_secs(7 * 24 * 60 * 60));

    /// Delay between the end of one run and the start of the next
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Once => None,
            Self::Every(interval) => Some(*interval),
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::DAILY
    }
}

impl FromStr for Schedule {
    type Err = String;

    /// Accepts `@once`, `@hourly`, `@daily`, `@weekly`, or `<n>s|m|h`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "@once" => return Ok(Self::Once),
            "@hourly" => return Ok(Self::HOURLY),
            "@daily" => return Ok(Self::DAILY),
            "@weekly" => return Ok(Self::WEEKLY),
            _ => {}
        }

        let invalid = || format!("Invalid schedule '{}': use @once, @hourly, @daily, @weekly or <n>s|m|h", s);

        let unit = s.chars().last().ok_or_else(invalid)?;
        let amount: u64 = s[..s.len() - unit.len_utf8()].parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }

        let seconds = match unit {
            's' => Some(amount),
            'm' => amount.checked_mul(60),
            'h' => amount.checked_mul(60 * 60),
            _ => None,
        }
        .ok_or_else(invalid)?;

        Ok(Self::Every(Duration::from_secs(seconds)))
    }
}

impl TryFrom<String> for Schedule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.to_string()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Once => write!(f, "@once"),
            s if s == Self::HOURLY => write!(f, "@hourly"),
            s if s == Self::DAILY => write!(f, "@daily"),
            s if s == Self::WEEKLY => write!(f, "@weekly"),
            Self::Every(interval) => write!(f, "{}s", interval.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert_eq!("@once".parse::<Schedule>().unwrap(), Schedule::Once);
        assert_eq!("@daily".parse::<Schedule>().unwrap(), Schedule::DAILY);
        assert_eq!("@hourly".parse::<Schedule>().unwrap().interval(), Some(Duration::from_secs(3600)));
        assert_eq!(Schedule::default(), Schedule::DAILY);
    }

    #[test]
    fn intervals() {
        assert_eq!("30s".parse::<Schedule>().unwrap().interval(), Some(Duration::from_secs(30)));
        assert_eq!("15m".parse::<Schedule>().unwrap().interval(), Some(Duration::from_secs(900)));
        assert_eq!("6h".parse::<Schedule>().unwrap().interval(), Some(Duration::from_secs(21600)));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Schedule>().is_err());
        assert!("@monthly".parse::<Schedule>().is_err());
        assert!("0m".parse::<Schedule>().is_err());
        assert!("5d".parse::<Schedule>().is_err());
        assert!("xm".parse::<Schedule>().is_err());
    }

    #[test]
    fn display_roundtrip() {
        for raw in ["@once", "@hourly", "@daily", "@weekly", "90s"] {
            let schedule: Schedule = raw.parse().unwrap();
            assert_eq!(schedule.to_string(), raw);
        }
        assert_eq!("2m".parse::<Schedule>().unwrap().to_string(), "120s");
    }
}

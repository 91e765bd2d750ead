/// Cron schedule resolution
///
/// A workflow's `on.cron.schedule` is either a literal cron expression or one of the
/// symbolic classes below, which resolve to a concrete expression with random jitter
/// so many workflows sharing a class do not all fire at the same instant.

use rand::{rngs::OsRng, Rng};

/// Once a day at a random hour
pub const RANDOM_DAILY: &str = "random-daily";
/// Once an hour at a random minute
pub const RANDOM_HOURLY: &str = "random-hourly";
/// Every 15 minutes from a random offset
pub const RANDOM_15_MIN: &str = "random-15-min";

/// A resolved schedule
///
/// `preserve_on_update` is set when the expression was generated, so re-applying the
/// definition keeps the expression the engine already has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub expression: String,
    pub preserve_on_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleClass {
    Daily,
    Hourly,
    FifteenMinutes,
}

impl ScheduleClass {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            RANDOM_DAILY => Some(Self::Daily),
            RANDOM_HOURLY => Some(Self::Hourly),
            RANDOM_15_MIN => Some(Self::FifteenMinutes),
            _ => None,
        }
    }
}

/// Resolve a schedule with the operating system's CSPRNG
pub fn resolve_schedule(input: &str) -> ScheduleSpec {
    resolve_schedule_with(input, &mut OsRng)
}

pub fn resolve_schedule_with<R: Rng>(input: &str, rng: &mut R) -> ScheduleSpec {
    let expression = match ScheduleClass::parse(input) {
        Some(ScheduleClass::Daily) => format!("0 {} * * *", rng.gen_range(0..24)),
        Some(ScheduleClass::Hourly) => format!("{} * * * *", rng.gen_range(0..60)),
        Some(ScheduleClass::FifteenMinutes) => {
            let base: u32 = rng.gen_range(0..15);
            format!("{},{},{},{} * * * *", base, base + 15, base + 30, base + 45)
        }
        None => {
            return ScheduleSpec {
                expression: input.trim().to_string(),
                preserve_on_update: false,
            }
        }
    };

    ScheduleSpec {
        expression,
        preserve_on_update: true,
    }
}

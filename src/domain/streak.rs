use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};

/// Minimum trimmed length of a text-only message that counts toward a streak.
pub const MIN_QUALIFYING_CHARS: usize = 5;

time::serde::format_description!(civil_date_format, Date, "[year]-[month]-[day]");

/// Visible "plant" stage of a pair's relationship, a pure function of the
/// current streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    Seed,
    Sprout,
    Growing,
    Thriving,
    Blooming,
    Flourishing,
}

impl GrowthStage {
    pub fn from_streak(streak_count: i64) -> Self {
        match streak_count {
            i64::MIN..=0 => Self::Seed,
            1..=2 => Self::Sprout,
            3..=6 => Self::Growing,
            7..=13 => Self::Thriving,
            14..=29 => Self::Blooming,
            _ => Self::Flourishing,
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "seed" => Some(Self::Seed),
            "sprout" => Some(Self::Sprout),
            "growing" => Some(Self::Growing),
            "thriving" => Some(Self::Thriving),
            "blooming" => Some(Self::Blooming),
            "flourishing" => Some(Self::Flourishing),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Sprout => "sprout",
            Self::Growing => "growing",
            Self::Thriving => "thriving",
            Self::Blooming => "blooming",
            Self::Flourishing => "flourishing",
        }
    }
}

/// Streak counters shared by the two members of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub streak: i64,
    pub longest: i64,
    pub stage: GrowthStage,
    #[serde(with = "civil_date_format::option")]
    pub last_streak_date: Option<Date>,
}

impl Default for StreakState {
    fn default() -> Self {
        Self {
            streak: 0,
            longest: 0,
            stage: GrowthStage::Seed,
            last_streak_date: None,
        }
    }
}

impl StreakState {
    /// Apply one qualifying interaction on `today`.
    ///
    /// Same day is a no-op, the following day extends the streak and any
    /// larger gap restarts it at 1. A date before `last_streak_date` never
    /// moves the state backwards.
    pub fn advanced(self, today: Date) -> Self {
        let streak = match self.last_streak_date {
            Some(last) if last >= today => return self,
            Some(last) if last.next_day() == Some(today) => self.streak + 1,
            _ => 1,
        };

        Self {
            streak,
            longest: self.longest.max(streak),
            stage: GrowthStage::from_streak(streak),
            last_streak_date: Some(today),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairStreak {
    pub user_a_id: i64,
    pub user_b_id: i64,
    pub streak_count: i64,
    pub longest_streak: i64,
    #[serde(with = "civil_date_format::option")]
    pub last_streak_date: Option<Date>,
    pub stage: GrowthStage,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PairStreak {
    pub fn state(&self) -> StreakState {
        StreakState {
            streak: self.streak_count,
            longest: self.longest_streak,
            stage: self.stage,
            last_streak_date: self.last_streak_date,
        }
    }
}

pub fn is_qualifying_message(text: &str, has_media: bool) -> bool {
    has_media || text.trim().chars().count() >= MIN_QUALIFYING_CHARS
}

/// Calendar date of `instant` in the deployment's civil timezone.
pub fn civil_date(instant: OffsetDateTime, offset: UtcOffset) -> Date {
    instant.to_offset(offset).date()
}

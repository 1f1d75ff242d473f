use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Meal bucket an analysis is logged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MealFor {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
    #[default]
    Other,
}

pub const MEAL_BUCKETS: &[MealFor] = &[
    MealFor::Breakfast,
    MealFor::Lunch,
    MealFor::Dinner,
    MealFor::Snack,
    MealFor::Other,
];

impl MealFor {
    /// Case-insensitive match; anything unrecognised lands in `Other`.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "breakfast" => Self::Breakfast,
            "lunch" => Self::Lunch,
            "dinner" => Self::Dinner,
            "snack" => Self::Snack,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MealFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MealFor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map_or(Self::Other, Self::parse_lenient))
    }
}

/// Strict variant for user input: rejects anything that is not a known bucket.
pub fn validate_meal_for(meal: &str) -> Result<MealFor> {
    let parsed = MealFor::parse_lenient(meal);
    if parsed == MealFor::Other && !meal.trim().eq_ignore_ascii_case("other") {
        let names: Vec<&str> = MEAL_BUCKETS.iter().map(|m| m.as_str()).collect();
        bail!("Invalid meal '{meal}'. Must be one of: {}", names.join(", "));
    }
    Ok(parsed)
}

// --- Numeric normalization ---

/// Normalize a decorated nutrient string such as `"1,250 kcal"` or `"12.5g"`.
///
/// Everything except ASCII digits, `.` and `-` is stripped before parsing.
/// Unparsable or non-finite input yields 0.
#[must_use]
pub fn normalize_nutrient(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn coerce_nutrient(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => Some(normalize_nutrient(s)),
        _ => None,
    }
}

fn deserialize_nutrient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_nutrient(&value).unwrap_or(0.0))
}

fn deserialize_opt_nutrient<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_nutrient(&value))
}

/// Quantity multipliers below 1 (or garbage) collapse to a single serving.
#[must_use]
pub fn normalize_consumed_count(count: f64) -> f64 {
    if count.is_finite() && count >= 1.0 {
        count
    } else {
        1.0
    }
}

fn default_consumed_count() -> f64 {
    1.0
}

fn deserialize_consumed_count<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(normalize_consumed_count(coerce_nutrient(&value).unwrap_or(1.0)))
}

fn default_true() -> bool {
    true
}

// --- Nutrient vectors ---

/// The seven summed nutrients, used for both per-unit bases and contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
}

impl Nutrients {
    pub const ZERO: Self = Self {
        calories: 0.0,
        protein: 0.0,
        carbs: 0.0,
        fat: 0.0,
        fiber: 0.0,
        sugar: 0.0,
        sodium: 0.0,
    };

    fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            calories: f(self.calories),
            protein: f(self.protein),
            carbs: f(self.carbs),
            fat: f(self.fat),
            fiber: f(self.fiber),
            sugar: f(self.sugar),
            sodium: f(self.sodium),
        }
    }

    fn zip(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self {
            calories: f(self.calories, other.calories),
            protein: f(self.protein, other.protein),
            carbs: f(self.carbs, other.carbs),
            fat: f(self.fat, other.fat),
            fiber: f(self.fiber, other.fiber),
            sugar: f(self.sugar, other.sugar),
            sodium: f(self.sodium, other.sodium),
        }
    }

    #[must_use]
    pub fn scale(self, factor: f64) -> Self {
        self.map(|v| v * factor)
    }

    /// Divide a quantity-adjusted vector back down to one serving.
    /// A non-positive count contributes nothing rather than dividing by zero.
    #[must_use]
    pub fn per_unit(self, count: f64) -> Self {
        if count.is_finite() && count > 0.0 {
            self.map(|v| v / count)
        } else {
            Self::ZERO
        }
    }

    #[must_use]
    pub fn clamp_non_negative(self) -> Self {
        self.map(|v| if v > 0.0 { v } else { 0.0 })
    }
}

impl Add for Nutrients {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a + b)
    }
}

impl Sub for Nutrients {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a - b)
    }
}

// --- Analysis entries ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionPayload {
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub calories: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub protein: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub fat: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub fiber: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub sugar: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub sodium: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub health_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score_reason: Option<String>,
    #[serde(default)]
    pub meal_for: MealFor,
}

impl NutritionPayload {
    #[must_use]
    pub fn nutrients(&self) -> Nutrients {
        Nutrients {
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            fiber: self.fiber,
            sugar: self.sugar,
            sodium: self.sodium,
        }
    }

    pub fn set_nutrients(&mut self, n: Nutrients) {
        self.calories = n.calories;
        self.protein = n.protein;
        self.carbs = n.carbs;
        self.fat = n.fat;
        self.fiber = n.fiber;
        self.sugar = n.sugar;
        self.sodium = n.sodium;
    }
}

/// Identity used for deduplication and completion tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Id(String),
    Fingerprint(DateTime<Utc>, String),
}

/// One logged food item as returned by the analysis backend.
///
/// Nutrient values in `nutrition` are quantity-adjusted (already multiplied by
/// `consumed_count`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEntry {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "detectedFood", alias = "label")]
    pub food_label: String,
    #[serde(default)]
    pub nutrition: NutritionPayload,
    #[serde(
        default,
        deserialize_with = "deserialize_opt_nutrient",
        skip_serializing_if = "Option::is_none"
    )]
    pub calories: Option<f64>,
    #[serde(
        default = "default_consumed_count",
        deserialize_with = "deserialize_consumed_count"
    )]
    pub consumed_count: f64,
    #[serde(default = "default_true")]
    pub analysis_complete: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    // Per-unit values captured when the entry entered a ledger.
    #[serde(skip)]
    base: Option<Nutrients>,
}

impl AnalysisEntry {
    #[must_use]
    pub fn new(created_at: DateTime<Utc>, food_label: &str, nutrition: NutritionPayload) -> Self {
        Self {
            id: None,
            created_at,
            food_label: food_label.to_string(),
            nutrition,
            calories: None,
            consumed_count: 1.0,
            analysis_complete: true,
            retry_count: 0,
            image_url: None,
            base: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> EntryKey {
        match &self.id {
            Some(id) => EntryKey::Id(id.clone()),
            None => EntryKey::Fingerprint(self.created_at, self.food_label.clone()),
        }
    }

    /// Same record by id when both sides have one, otherwise by timestamp + label.
    #[must_use]
    pub fn is_same_as(&self, other: &Self) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.created_at == other.created_at && self.food_label == other.food_label,
        }
    }

    #[must_use]
    pub fn meal_for(&self) -> MealFor {
        self.nutrition.meal_for
    }

    /// Per-unit nutrient values. Pinned once the entry is in a ledger so that
    /// repeated rescaling always starts from the same reference.
    #[must_use]
    pub fn base_nutrients(&self) -> Nutrients {
        self.base
            .unwrap_or_else(|| self.nutrition.nutrients().per_unit(self.consumed_count))
    }

    pub(crate) fn pin_base(&mut self) {
        if self.base.is_none() {
            self.base = Some(self.base_nutrients());
        }
    }

    pub(crate) fn rescale(&mut self, base: Nutrients, count: f64) {
        let adjusted = base.scale(count);
        self.base = Some(base);
        self.consumed_count = count;
        self.nutrition.set_nutrients(adjusted);
        if self.calories.is_some() {
            self.calories = Some(adjusted.calories);
        }
    }

    /// Quantity-adjusted contribution to the day's totals.
    #[must_use]
    pub fn contribution(&self) -> Nutrients {
        self.base_nutrients().scale(self.consumed_count)
    }

    /// Calories shown for this entry: the top-level field when present,
    /// otherwise the nutrition payload's.
    #[must_use]
    pub fn display_calories(&self) -> f64 {
        self.calories
            .filter(|v| v.is_finite())
            .unwrap_or(self.nutrition.calories)
    }

    #[must_use]
    pub fn needs_polling(&self, max_retries: u32) -> bool {
        !self.analysis_complete && self.retry_count < max_retries
    }
}

// --- Day totals ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaTotals {
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_calories: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_protein: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_carbs: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_fat: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_fiber: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_sugar: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_sodium: f64,
    #[serde(default, deserialize_with = "deserialize_nutrient")]
    pub total_health_score: f64,
}

impl MetaTotals {
    #[must_use]
    pub fn new(n: Nutrients, total_health_score: f64) -> Self {
        Self {
            total_calories: n.calories,
            total_protein: n.protein,
            total_carbs: n.carbs,
            total_fat: n.fat,
            total_fiber: n.fiber,
            total_sugar: n.sugar,
            total_sodium: n.sodium,
            total_health_score,
        }
    }

    #[must_use]
    pub fn nutrients(&self) -> Nutrients {
        Nutrients {
            calories: self.total_calories,
            protein: self.total_protein,
            carbs: self.total_carbs,
            fat: self.total_fat,
            fiber: self.total_fiber,
            sugar: self.total_sugar,
            sodium: self.total_sodium,
        }
    }

    #[must_use]
    pub fn from_entries(entries: &[AnalysisEntry]) -> Self {
        let sum = entries
            .iter()
            .fold(Nutrients::ZERO, |acc, e| acc + e.contribution());
        Self::new(sum.clamp_non_negative(), mean_health_score(entries))
    }
}

/// Arithmetic mean of the entries' health scores, 0 for an empty day.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_health_score(entries: &[AnalysisEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let sum: f64 = entries.iter().map(|e| e.nutrition.health_score).sum();
    sum / entries.len() as f64
}

/// Authoritative response of the daily analyses endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaySnapshot {
    #[serde(default, alias = "analyses")]
    pub entries: Vec<AnalysisEntry>,
    #[serde(default)]
    pub meta: Option<MetaTotals>,
}

/// The full set of entries plus totals for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAggregate {
    pub date: NaiveDate,
    pub entries: Vec<AnalysisEntry>,
    pub meta: MetaTotals,
}

// --- Month summary ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    #[must_use]
    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    #[must_use]
    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    #[must_use]
    pub fn pred(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = anyhow::Error;

    /// Parses `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
            .with_context(|| format!("Invalid month '{s}'. Use YYYY-MM"))?;
        Ok(Self::of(date))
    }
}

/// Month-level gamified progress counters shown beside the calendar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub reading_count: u32,
    #[serde(default)]
    pub reading_goal: u32,
    #[serde(default)]
    pub days_logged: u32,
}

impl MonthlySummary {
    #[must_use]
    pub fn goal_reached(&self) -> bool {
        self.reading_goal > 0 && self.reading_count >= self.reading_goal
    }

    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.reading_goal == 0 {
            return 0.0;
        }
        (f64::from(self.reading_count) / f64::from(self.reading_goal) * 100.0).min(100.0)
    }
}

// --- Edits ---

/// Fields a user may change on a logged entry.
///
/// Nutrient overrides are per-serving values; the ledger rescales them by the
/// (possibly new) `consumed_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisUpdate {
    pub food_label: Option<String>,
    pub meal_for: Option<MealFor>,
    pub consumed_count: Option<f64>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
    pub sodium: Option<f64>,
    pub health_score: Option<f64>,
}

const EPSILON: f64 = 1e-9;

fn differs(new: Option<f64>, current: f64) -> bool {
    new.is_some_and(|v| v.is_finite() && (v - current).abs() > EPSILON)
}

impl AnalysisUpdate {
    fn overrides(&self) -> [Option<f64>; 7] {
        [
            self.calories,
            self.protein,
            self.carbs,
            self.fat,
            self.fiber,
            self.sugar,
            self.sodium,
        ]
    }

    /// Check user-supplied values before anything is sent.
    pub fn validate(&self) -> Result<()> {
        if let Some(count) = self.consumed_count {
            if !(count.is_finite() && count >= 1.0) {
                bail!("consumed count must be at least 1 (got {count})");
            }
        }
        if self.overrides().iter().flatten().any(|v| *v < 0.0) {
            bail!("nutrient values must not be negative");
        }
        if self
            .food_label
            .as_deref()
            .is_some_and(|l| l.trim().is_empty())
        {
            bail!("food label must not be empty");
        }
        Ok(())
    }

    /// Whether applying this update to `entry` would change anything.
    #[must_use]
    pub fn changes(&self, entry: &AnalysisEntry) -> bool {
        let base = entry.base_nutrients();
        let label_changed = self
            .food_label
            .as_deref()
            .map(str::trim)
            .is_some_and(|l| !l.is_empty() && l != entry.food_label);
        let meal_changed = self.meal_for.is_some_and(|m| m != entry.meal_for());
        label_changed
            || meal_changed
            || differs(self.consumed_count, entry.consumed_count)
            || differs(self.calories, base.calories)
            || differs(self.protein, base.protein)
            || differs(self.carbs, base.carbs)
            || differs(self.fat, base.fat)
            || differs(self.fiber, base.fiber)
            || differs(self.sugar, base.sugar)
            || differs(self.sodium, base.sodium)
            || differs(self.health_score, entry.nutrition.health_score)
    }

    /// Replace base values with any finite overrides.
    #[must_use]
    pub fn apply_to_base(&self, base: Nutrients) -> Nutrients {
        let pick = |o: Option<f64>, cur: f64| o.filter(|v| v.is_finite()).unwrap_or(cur);
        Nutrients {
            calories: pick(self.calories, base.calories),
            protein: pick(self.protein, base.protein),
            carbs: pick(self.carbs, base.carbs),
            fat: pick(self.fat, base.fat),
            fiber: pick(self.fiber, base.fiber),
            sugar: pick(self.sugar, base.sugar),
            sodium: pick(self.sodium, base.sodium),
        }
    }

    /// Wire payload with empty, missing and NaN fields pruned.
    ///
    /// `nutrition` on the wire is quantity-adjusted, so per-serving overrides
    /// go out multiplied by the count the entry ends up with.
    #[must_use]
    pub fn to_payload(&self, current_count: f64) -> Map<String, Value> {
        fn put_num(map: &mut Map<String, Value>, key: &str, value: Option<f64>) {
            if let Some(n) = value
                .filter(|v| v.is_finite())
                .and_then(serde_json::Number::from_f64)
            {
                map.insert(key.to_string(), Value::Number(n));
            }
        }

        let mut payload = Map::new();
        if let Some(label) = self
            .food_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            payload.insert("foodLabel".to_string(), Value::String(label.to_string()));
        }
        put_num(&mut payload, "consumedCount", self.consumed_count);

        let count = self
            .consumed_count
            .map_or(current_count, normalize_consumed_count);
        let adjusted = |v: Option<f64>| v.map(|v| v * count);

        let mut nutrition = Map::new();
        put_num(&mut nutrition, "calories", adjusted(self.calories));
        put_num(&mut nutrition, "protein", adjusted(self.protein));
        put_num(&mut nutrition, "carbs", adjusted(self.carbs));
        put_num(&mut nutrition, "fat", adjusted(self.fat));
        put_num(&mut nutrition, "fiber", adjusted(self.fiber));
        put_num(&mut nutrition, "sugar", adjusted(self.sugar));
        put_num(&mut nutrition, "sodium", adjusted(self.sodium));
        put_num(&mut nutrition, "healthScore", self.health_score);
        if let Some(meal) = self.meal_for {
            nutrition.insert("mealFor".to_string(), Value::String(meal.to_string()));
        }
        if !nutrition.is_empty() {
            payload.insert("nutrition".to_string(), Value::Object(nutrition));
        }
        payload
    }
}

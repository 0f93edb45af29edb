//! Daily nutrition projection.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::event::{EventPayload, EventType, StoredEvent};

use super::steps::{parse_date, parse_json};
use super::DomainProjector;

/// One logged meal, as stored in the row's JSON detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealEntry {
    /// Meal title as logged.
    pub title: String,
    /// When the meal was eaten.
    pub eaten_at: DateTime<Utc>,
    /// Meal slot ("BREAKFAST", "LUNCH", ...), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<String>,
    /// Kilocalories, if logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories_kcal: Option<u32>,
    /// Qualitative rating, if logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_rating: Option<String>,
}

/// One day of nutrition data. Macro totals sum only the values devices
/// actually logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealsDaily {
    /// The calendar date (UTC).
    pub date: NaiveDate,
    /// Number of meals logged.
    pub meal_count: u32,
    /// Total kilocalories across logged values.
    pub total_kcal: u32,
    /// Total protein grams across logged values.
    pub protein_grams: u32,
    /// Total fat grams across logged values.
    pub fat_grams: u32,
    /// Total carbohydrate grams across logged values.
    pub carbohydrates_grams: u32,
    /// The day's meals, ordered by time eaten.
    pub meals: Vec<MealEntry>,
}

/// Owns `proj_meals`.
#[derive(Clone)]
pub struct MealsProjector {
    store: Store,
}

impl MealsProjector {
    /// Create a projector over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// The projection row for one day, if any meal was logged.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn daily_breakdown(
        &self,
        device_id: &str,
        date: NaiveDate,
    ) -> crate::error::Result<Option<MealsDaily>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT meal_count, total_kcal, protein_grams, fat_grams,
                        carbohydrates_grams, meals
                 FROM proj_meals WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
                |row| row_to_daily(date, row, 0),
            )
            .optional()
        })
    }

    /// Projection rows for every day in `[from, to]` that has data.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on storage failure.
    pub fn range_summary(
        &self,
        device_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> crate::error::Result<Vec<MealsDaily>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT date, meal_count, total_kcal, protein_grams, fat_grams,
                        carbohydrates_grams, meals
                 FROM proj_meals
                 WHERE device_id = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )?;
            let rows = stmt.query_map(
                params![device_id, from.to_string(), to.to_string()],
                |row| {
                    let date = parse_date(row, 0)?;
                    row_to_daily(date, row, 1)
                },
            )?;
            rows.collect()
        })
    }

    fn compute(date: NaiveDate, events: &[StoredEvent]) -> Option<MealsDaily> {
        let mut meals = Vec::new();
        let (mut kcal, mut protein, mut fat, mut carbs) = (0u32, 0u32, 0u32, 0u32);

        for event in events {
            let EventPayload::Meal(data) = &event.payload else {
                continue;
            };
            if data.eaten_at.date_naive() != date {
                continue;
            }
            kcal = kcal.saturating_add(data.calories_kcal.unwrap_or(0));
            protein = protein.saturating_add(data.protein_grams.unwrap_or(0));
            fat = fat.saturating_add(data.fat_grams.unwrap_or(0));
            carbs = carbs.saturating_add(data.carbohydrates_grams.unwrap_or(0));
            meals.push(MealEntry {
                title: data.title.clone(),
                eaten_at: data.eaten_at,
                meal_type: data.meal_type.clone(),
                calories_kcal: data.calories_kcal,
                health_rating: data.health_rating.clone(),
            });
        }
        if meals.is_empty() {
            return None;
        }
        meals.sort_by_key(|m| m.eaten_at);

        Some(MealsDaily {
            date,
            meal_count: meals.len() as u32,
            total_kcal: kcal,
            protein_grams: protein,
            fat_grams: fat,
            carbohydrates_grams: carbs,
            meals,
        })
    }
}

impl DomainProjector for MealsProjector {
    fn name(&self) -> &'static str {
        "meals"
    }

    fn event_types(&self) -> &'static [EventType] {
        &[EventType::Meal]
    }

    fn project_events(
        &self,
        device_id: &str,
        date: NaiveDate,
        events: &[StoredEvent],
    ) -> anyhow::Result<()> {
        let daily = Self::compute(date, events);
        let meals_json = daily
            .as_ref()
            .map(|d| serde_json::to_string(&d.meals))
            .transpose()?;

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM proj_meals WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            if let (Some(d), Some(meals)) = (&daily, &meals_json) {
                tx.execute(
                    "INSERT INTO proj_meals (
                        device_id, date, meal_count, total_kcal, protein_grams,
                        fat_grams, carbohydrates_grams, meals
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        device_id,
                        date.to_string(),
                        d.meal_count,
                        d.total_kcal,
                        d.protein_grams,
                        d.fat_grams,
                        d.carbohydrates_grams,
                        meals,
                    ],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn delete_projections_for_date(&self, device_id: &str, date: NaiveDate) -> anyhow::Result<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM proj_meals WHERE device_id = ?1 AND date = ?2",
                params![device_id, date.to_string()],
            )?;
            Ok(())
        })?;
        Ok(())
    }
}

fn row_to_daily(
    date: NaiveDate,
    row: &rusqlite::Row<'_>,
    base: usize,
) -> rusqlite::Result<MealsDaily> {
    let meals_json: String = row.get(base + 5)?;
    let meals = parse_json(&meals_json, base + 5)?;
    Ok(MealsDaily {
        date,
        meal_count: row.get(base)?,
        total_kcal: row.get(base + 1)?,
        protein_grams: row.get(base + 2)?,
        fat_grams: row.get(base + 3)?,
        carbohydrates_grams: row.get(base + 4)?,
        meals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventEnvelope;
    use serde_json::json;

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).expect("valid date")
    }

    fn meal_event(key: &str, title: &str, at: &str, kcal: u32, protein: u32) -> StoredEvent {
        EventEnvelope {
            idempotency_key: key.into(),
            event_type: EventType::Meal,
            payload: json!({
                "title": title,
                "eatenAt": at,
                "mealType": "LUNCH",
                "caloriesKcal": kcal,
                "proteinGrams": protein,
                "healthRating": "HEALTHY"
            }),
        }
        .to_stored_event("dev-1", Utc::now())
        .expect("valid envelope")
    }

    #[test]
    fn macros_sum_logged_values() {
        let projector = MealsProjector::new(Store::open_in_memory().expect("open store"));
        let events = [
            meal_event("k-1", "Salad", "2025-01-05T12:30:00Z", 420, 18),
            meal_event("k-2", "Oats", "2025-01-05T07:30:00Z", 320, 12),
        ];
        projector
            .project_events("dev-1", jan(5), &events)
            .expect("project");

        let daily = projector
            .daily_breakdown("dev-1", jan(5))
            .expect("read")
            .expect("row present");
        assert_eq!(daily.meal_count, 2);
        assert_eq!(daily.total_kcal, 740);
        assert_eq!(daily.protein_grams, 30);
        assert_eq!(daily.fat_grams, 0, "unlogged macros contribute nothing");
        assert_eq!(daily.meals[0].title, "Oats", "ordered by time eaten");
    }
}

//! Category feedback operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::CategoryFeedback;

impl Database {
    /// Remember a manual category for a description, replacing any earlier one.
    /// `None` forgets it.
    pub fn set_category_feedback(&self, description: &str, category: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        match category {
            Some(category) => {
                conn.execute(
                    r#"
                    INSERT INTO category_feedback (description, category)
                    VALUES (?, ?)
                    ON CONFLICT (description) DO UPDATE SET
                        category = excluded.category,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                    params![description, category],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM category_feedback WHERE description = ?",
                    params![description],
                )?;
            }
        }
        Ok(())
    }

    /// Remembered category for a description (case-insensitive)
    pub fn feedback_category(&self, description: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT category FROM category_feedback WHERE description = ?",
                params![description],
                |row| row.get(0),
            )
            .optional()?;
        Ok(category)
    }

    /// All remembered corrections, most recent first
    pub fn list_category_feedback(&self) -> Result<Vec<CategoryFeedback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT description, category, updated_at FROM category_feedback ORDER BY updated_at DESC, description",
        )?;

        let feedback = stmt
            .query_map([], |row| {
                let updated_at: String = row.get(2)?;
                Ok(CategoryFeedback {
                    description: row.get(0)?,
                    category: row.get(1)?,
                    updated_at: parse_datetime(&updated_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(feedback)
    }
}

//! Preset repository. A preset carries the EQ curve applied in Stage 2.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};
use crate::stages::eq::EqSettings;

#[derive(Debug, Clone)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub eq_settings: Option<EqSettings>,
    pub created_at: String,
}

impl Preset {
    pub fn new(id: &str, name: &str, eq_settings: Option<EqSettings>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            eq_settings,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn insert(db: &Database, preset: &Preset) -> Result<(), DatabaseError> {
    let eq_settings = preset
        .eq_settings
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::Json {
            column: "eq_settings",
            source: e,
        })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO presets (id, name, eq_settings, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![preset.id, preset.name, eq_settings, preset.created_at],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Preset>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT id, name, eq_settings, created_at FROM presets WHERE id = ?1",
                params![id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    })?;

    let Some((id, name, eq_json, created_at)) = row else {
        return Ok(None);
    };

    let eq_settings = match eq_json {
        Some(raw) if !raw.trim().is_empty() => Some(
            serde_json::from_str::<EqSettings>(&raw).map_err(|e| DatabaseError::Json {
                column: "eq_settings",
                source: e,
            })?,
        ),
        _ => None,
    };

    Ok(Some(Preset {
        id,
        name,
        eq_settings,
        created_at,
    }))
}

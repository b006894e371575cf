use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{KeyValueStore, StorageError};
use crate::vibration::pattern::{ParseError, Pattern};

pub const LIBRARY_KEY: &str = "vibekit.savedPatterns";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("cannot save pattern: {0}")]
    InvalidPattern(#[from] ParseError),
    #[error("pattern name must not be empty")]
    EmptyName,
    #[error("no saved pattern with id {0}")]
    NotFound(i64),
    #[error("no pattern id is left after {0}")]
    IdsExhausted(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPattern {
    pub id: i64,
    pub name: String,
    pub pattern_text: String,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite_order: Option<u32>,
    pub created_at: DateTime<Utc>,
}

pub struct PatternLibrary<S> {
    store: S,
}

impl<S: KeyValueStore> PatternLibrary<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Vec<SavedPattern> {
        let mut patterns = self.load();
        patterns.sort_by(listing_order);
        patterns
    }

    pub fn get(&self, id: i64) -> Option<SavedPattern> {
        self.load().into_iter().find(|saved| saved.id == id)
    }

    pub fn save(&mut self, name: &str, pattern_text: &str) -> Result<SavedPattern, LibraryError> {
        self.save_at(name, pattern_text, Utc::now())
    }

    pub fn save_at(
        &mut self,
        name: &str,
        pattern_text: &str,
        now: DateTime<Utc>,
    ) -> Result<SavedPattern, LibraryError> {
        let pattern = Pattern::parse(pattern_text)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::EmptyName);
        }

        let mut patterns = self.load();
        let newest = patterns.iter().map(|saved| saved.id).max();
        let id = match newest {
            Some(newest) if newest >= now.timestamp_millis() => newest
                .checked_add(1)
                .ok_or(LibraryError::IdsExhausted(newest))?,
            _ => now.timestamp_millis(),
        };
        let saved = SavedPattern {
            id,
            name: name.to_string(),
            pattern_text: pattern.to_string(),
            favorite: false,
            favorite_order: None,
            created_at: now,
        };
        patterns.push(saved.clone());
        self.persist(&patterns)?;
        tracing::info!(id, name = %saved.name, pattern = %saved.pattern_text, "pattern saved");
        Ok(saved)
    }

    pub fn rename(&mut self, id: i64, new_name: &str) -> Result<SavedPattern, LibraryError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(LibraryError::EmptyName);
        }
        let mut patterns = self.load();
        let saved = patterns
            .iter_mut()
            .find(|saved| saved.id == id)
            .ok_or(LibraryError::NotFound(id))?;
        saved.name = new_name.to_string();
        let renamed = saved.clone();
        self.persist(&patterns)?;
        Ok(renamed)
    }

    pub fn toggle_favorite(&mut self, id: i64) -> Result<SavedPattern, LibraryError> {
        let mut patterns = self.load();
        let next_order = patterns
            .iter()
            .filter(|saved| saved.favorite)
            .filter_map(|saved| saved.favorite_order)
            .max()
            .map_or(0, |order| order + 1);
        let saved = patterns
            .iter_mut()
            .find(|saved| saved.id == id)
            .ok_or(LibraryError::NotFound(id))?;
        saved.favorite = !saved.favorite;
        saved.favorite_order = saved.favorite.then_some(next_order);
        let toggled = saved.clone();
        self.persist(&patterns)?;
        Ok(toggled)
    }

    pub fn delete(&mut self, id: i64) -> Result<bool, LibraryError> {
        let mut patterns = self.load();
        let before = patterns.len();
        patterns.retain(|saved| saved.id != id);
        if patterns.len() == before {
            return Ok(false);
        }
        self.persist(&patterns)?;
        Ok(true)
    }

    // false when either id is not a favorite; nothing is written then
    pub fn reorder_favorites(
        &mut self,
        dragged_id: i64,
        target_id: i64,
    ) -> Result<bool, LibraryError> {
        let mut patterns = self.load();
        let mut favorites = patterns
            .iter()
            .filter(|saved| saved.favorite)
            .cloned()
            .collect::<Vec<_>>();
        favorites.sort_by(listing_order);

        let dragged_index = favorites.iter().position(|saved| saved.id == dragged_id);
        let target_index = favorites.iter().position(|saved| saved.id == target_id);
        let (Some(dragged_index), Some(target_index)) = (dragged_index, target_index) else {
            return Ok(false);
        };
        if dragged_index == target_index {
            return Ok(false);
        }

        let dragged = favorites.remove(dragged_index);
        favorites.insert(target_index, dragged);
        for (order, favorite) in favorites.iter().enumerate() {
            if let Some(saved) = patterns.iter_mut().find(|saved| saved.id == favorite.id) {
                saved.favorite_order = u32::try_from(order).ok();
            }
        }
        self.persist(&patterns)?;
        Ok(true)
    }

    pub fn replay(&self, id: i64) -> Result<Pattern, LibraryError> {
        let saved = self.get(id).ok_or(LibraryError::NotFound(id))?;
        Ok(Pattern::parse(&saved.pattern_text)?)
    }

    fn load(&self) -> Vec<SavedPattern> {
        let Some(raw) = self.store.get(LIBRARY_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<SavedPattern>>(&raw) {
            Ok(patterns) => patterns,
            Err(err) => {
                tracing::warn!(error = %err, "saved patterns unreadable; starting empty");
                Vec::new()
            }
        }
    }

    fn persist(&mut self, patterns: &[SavedPattern]) -> Result<(), LibraryError> {
        let text = serde_json::to_string(patterns).map_err(StorageError::from)?;
        self.store.set(LIBRARY_KEY, text)?;
        Ok(())
    }
}

fn listing_order(a: &SavedPattern, b: &SavedPattern) -> Ordering {
    match (a.favorite, b.favorite) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => match (a.favorite_order, b.favorite_order) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        (false, false) => b.id.cmp(&a.id),
    }
}

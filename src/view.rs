//! Pure filtering and sorting of a title list for display.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};

use crate::models::{Title, TitleType};

/// Category kept out of the default catalog view. Its titles show up only when it is
/// selected explicitly.
pub const WATCHLIST_CATEGORY: &str = "assistir";

/// SortOrder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SortOrder {
    NameAsc,
    NameDesc,
    RatingAsc,
    RatingDesc,
}

/// TitleQuery
///
/// Query string of the catalog view (`?type=&category=&search=&sort=`). Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct TitleQuery {
    #[serde(rename = "type")]
    #[param(value_type = Option<String>)]
    pub title_type: Option<TitleType>,
    pub category: Option<String>,
    /// Case-insensitive substring of the name.
    pub search: Option<String>,
    #[param(value_type = Option<String>)]
    pub sort: Option<SortOrder>,
}

/// apply_query
///
/// Returns the titles that pass every filter, sorted as requested. Sorting is stable, and
/// without `sort` the input order is kept.
pub fn apply_query(titles: &[Title], query: &TitleQuery) -> Vec<Title> {
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let category = query.category.as_deref().filter(|c| !c.is_empty());

    let mut visible: Vec<Title> = titles
        .iter()
        .filter(|t| query.title_type.is_none_or(|ty| t.title_type == ty))
        .filter(|t| match category {
            Some(category) => t.category == category,
            None => t.category != WATCHLIST_CATEGORY,
        })
        .filter(|t| {
            search
                .as_ref()
                .is_none_or(|needle| t.name.to_lowercase().contains(needle.as_str()))
        })
        .cloned()
        .collect();

    if let Some(sort) = query.sort {
        match sort {
            SortOrder::NameAsc => visible.sort_by_key(|t| t.name.to_lowercase()),
            SortOrder::NameDesc => {
                visible.sort_by(|a, b| b.name.to_lowercase().cmp(&a.name.to_lowercase()))
            }
            SortOrder::RatingAsc => visible.sort_by(|a, b| a.rating.total_cmp(&b.rating)),
            SortOrder::RatingDesc => visible.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
        }
    }

    visible
}

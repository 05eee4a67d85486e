use media_catalog::{
    models::{Title, TitleType},
    view::{SortOrder, TitleQuery, WATCHLIST_CATEGORY, apply_query},
};
use uuid::Uuid;

fn title(name: &str, title_type: TitleType, category: &str, rating: f64) -> Title {
    Title {
        id: Uuid::new_v4(),
        name: name.to_string(),
        title_type,
        category: category.to_string(),
        rating,
        ..Default::default()
    }
}

fn library() -> Vec<Title> {
    vec![
        title("Heat", TitleType::Movie, "ação", 8.0),
        title("breaking bad", TitleType::Series, "drama", 9.5),
        title("Avenida Brasil", TitleType::Soap, "drama", 7.0),
        title("Dune", TitleType::Movie, WATCHLIST_CATEGORY, 0.0),
        title("Amélie", TitleType::Movie, "comédia", 8.0),
    ]
}

fn names(titles: &[Title]) -> Vec<&str> {
    titles.iter().map(|t| t.name.as_str()).collect()
}

#[test]
fn test_default_query_hides_watchlist_and_keeps_order() {
    let result = apply_query(&library(), &TitleQuery::default());
    assert_eq!(
        names(&result),
        ["Heat", "breaking bad", "Avenida Brasil", "Amélie"]
    );
}

#[test]
fn test_watchlist_shows_only_when_selected() {
    let query = TitleQuery {
        category: Some(WATCHLIST_CATEGORY.into()),
        ..Default::default()
    };
    assert_eq!(names(&apply_query(&library(), &query)), ["Dune"]);
}

#[test]
fn test_empty_category_means_no_filter() {
    let query = TitleQuery {
        category: Some(String::new()),
        ..Default::default()
    };
    assert_eq!(apply_query(&library(), &query).len(), 4);
}

#[test]
fn test_filters_combine() {
    let query = TitleQuery {
        title_type: Some(TitleType::Movie),
        category: Some("ação".into()),
        ..Default::default()
    };
    assert_eq!(names(&apply_query(&library(), &query)), ["Heat"]);

    let query = TitleQuery {
        title_type: Some(TitleType::Series),
        category: Some("ação".into()),
        ..Default::default()
    };
    assert!(apply_query(&library(), &query).is_empty());
}

#[test]
fn test_search_is_trimmed_and_case_insensitive() {
    let query = TitleQuery {
        search: Some("  BREAKING ".into()),
        ..Default::default()
    };
    assert_eq!(names(&apply_query(&library(), &query)), ["breaking bad"]);

    let blank = TitleQuery {
        search: Some("   ".into()),
        ..Default::default()
    };
    assert_eq!(apply_query(&library(), &blank).len(), 4);
}

#[test]
fn test_name_sorts_ignore_case() {
    let asc = TitleQuery {
        sort: Some(SortOrder::NameAsc),
        ..Default::default()
    };
    assert_eq!(
        names(&apply_query(&library(), &asc)),
        ["Amélie", "Avenida Brasil", "breaking bad", "Heat"]
    );

    let desc = TitleQuery {
        sort: Some(SortOrder::NameDesc),
        ..Default::default()
    };
    assert_eq!(
        names(&apply_query(&library(), &desc)),
        ["Heat", "breaking bad", "Avenida Brasil", "Amélie"]
    );
}

#[test]
fn test_rating_sorts_are_stable() {
    let desc = TitleQuery {
        sort: Some(SortOrder::RatingDesc),
        ..Default::default()
    };
    // Heat and Amélie tie at 8.0 and keep their input order.
    assert_eq!(
        names(&apply_query(&library(), &desc)),
        ["breaking bad", "Heat", "Amélie", "Avenida Brasil"]
    );

    let asc = TitleQuery {
        sort: Some(SortOrder::RatingAsc),
        ..Default::default()
    };
    assert_eq!(
        names(&apply_query(&library(), &asc)),
        ["Avenida Brasil", "Heat", "Amélie", "breaking bad"]
    );
}

#[test]
fn test_query_string_parsing() {
    let query: TitleQuery =
        serde_json::from_value(serde_json::json!({ "type": "soap", "sort": "rating_desc" }))
            .unwrap();
    assert_eq!(query.title_type, Some(TitleType::Soap));
    assert_eq!(query.sort, Some(SortOrder::RatingDesc));
    assert!(query.category.is_none());
    assert!(query.search.is_none());
}

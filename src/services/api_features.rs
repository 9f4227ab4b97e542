use bson::{oid::ObjectId, Bson, Document};
use serde_json::{Map, Value};

/// Query-string keys that control the query rather than filter it.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "field"];
const OPERATORS: [&str; 4] = ["gte", "gt", "lte", "lt"];
/// Fields holding ObjectIds; their values are compared as ids, not text.
const REFERENCE_FIELDS: [&str; 4] = ["_id", "tour", "user", "guides"];

const DEFAULT_SORT: &str = "-createdAt";
const DEFAULT_FIELDS: &str = "-__v";
const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 100;

pub type QueryParams = Map<String, Value>;

/// The composed query a `Store` executes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub sort: Document,
    pub projection: Document,
    pub skip: u64,
    pub limit: i64,
}

/// Parses a raw query string, expanding bracket keys into nested objects.
///
/// `price[gte]=500&difficulty=easy` becomes `{"price": {"gte": "500"}, "difficulty": "easy"}`.
/// When a key repeats, the last value wins.
pub fn parse_query_string(raw: &str) -> QueryParams {
    let mut params = Map::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let mut segments = key
            .split('[')
            .map(|segment| segment.trim_end_matches(']'))
            .filter(|segment| !segment.is_empty());
        let Some(first) = segments.next() else {
            continue;
        };
        let rest: Vec<&str> = segments.collect();
        insert_path(&mut params, first, &rest, value.into_owned());
    }
    params
}

fn insert_path(map: &mut QueryParams, key: &str, rest: &[&str], value: String) {
    match rest.split_first() {
        None => {
            map.insert(key.to_string(), Value::String(value));
        }
        Some((next, tail)) => {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, next, tail, value);
            }
        }
    }
}

/// Builds a list query from untrusted query parameters.
///
/// Stages are meant to be chained in the order `filter`, `sort`, `fields`,
/// `pagination`. None of them fail: malformed input falls back to defaults.
#[derive(Debug, Clone)]
pub struct QueryFeatures {
    params: QueryParams,
    query: FindQuery,
}

impl QueryFeatures {
    pub fn new(params: QueryParams) -> Self {
        Self {
            params,
            query: FindQuery::default(),
        }
    }

    pub fn filter(mut self) -> Self {
        let mut filter = self.params.clone();
        for key in RESERVED_KEYS {
            filter.remove(key);
        }

        if let Value::Object(rewritten) = rewrite_operators(Value::Object(filter)) {
            self.query.filter = rewritten
                .into_iter()
                .map(|(key, value)| {
                    let value = if REFERENCE_FIELDS.contains(&key.as_str()) {
                        reference_to_bson(value)
                    } else {
                        json_to_bson(value)
                    };
                    (key, value)
                })
                .collect();
        }
        self
    }

    pub fn sort(mut self) -> Self {
        let sort = self.param_str("sort").unwrap_or(DEFAULT_SORT);
        self.query.sort = directions(sort, 1, -1);
        self
    }

    pub fn fields(mut self) -> Self {
        let fields = self.param_str("field").unwrap_or(DEFAULT_FIELDS);
        self.query.projection = directions(fields, 1, 0);
        self
    }

    pub fn pagination(mut self) -> Self {
        let page = self.param_int("page").unwrap_or(DEFAULT_PAGE);
        let limit = self.param_int("limit").unwrap_or(DEFAULT_LIMIT);
        let skip = limit.saturating_mul(page.saturating_sub(1));

        self.query.limit = limit;
        // The driver cannot express a negative skip.
        self.query.skip = u64::try_from(skip).unwrap_or(0);
        self
    }

    pub fn build(self) -> FindQuery {
        self.query
    }

    fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn param_int(&self, key: &str) -> Option<i64> {
        self.param_str(key).and_then(|value| value.parse().ok())
    }
}

/// `"-price,name"` becomes `{price: descending, name: ascending}`.
fn directions(list: &str, ascending: i32, descending: i32) -> Document {
    let mut doc = Document::new();
    for field in list.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        match field.strip_prefix('-') {
            Some(name) if !name.is_empty() => {
                doc.insert(name, descending);
            }
            Some(_) => {}
            None => {
                doc.insert(field, ascending);
            }
        }
    }
    doc
}

/// Prefixes bare comparison keywords used as object keys with `$`, at any depth.
pub fn rewrite_operators(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let key = if OPERATORS.contains(&key.as_str()) {
                        format!("${}", key)
                    } else {
                        key
                    };
                    (key, rewrite_operators(value))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(rewrite_operators).collect()),
        other => other,
    }
}

fn json_to_bson(value: Value) -> Bson {
    match value {
        Value::Object(map) => Bson::Document(
            map.into_iter()
                .map(|(key, value)| (key, json_to_bson(value)))
                .collect(),
        ),
        Value::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        Value::String(s) => coerce(&s),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Bson::Int64(i),
            None => Bson::Double(n.as_f64().unwrap_or_default()),
        },
        Value::Bool(b) => Bson::Boolean(b),
        Value::Null => Bson::Null,
    }
}

fn reference_to_bson(value: Value) -> Bson {
    match value {
        Value::String(s) => match ObjectId::parse_str(&s) {
            Ok(id) => Bson::ObjectId(id),
            Err(_) => coerce(&s),
        },
        Value::Object(map) => Bson::Document(
            map.into_iter()
                .map(|(key, value)| (key, reference_to_bson(value)))
                .collect(),
        ),
        Value::Array(items) => Bson::Array(items.into_iter().map(reference_to_bson).collect()),
        other => json_to_bson(other),
    }
}

/// Query-string values arrive as text; numbers and booleans are compared as such.
fn coerce(value: &str) -> Bson {
    if let Ok(i) = value.parse::<i64>() {
        return Bson::Int64(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        if f.is_finite() {
            return Bson::Double(f);
        }
    }
    match value {
        "true" => Bson::Boolean(true),
        "false" => Bson::Boolean(false),
        _ => Bson::String(value.to_string()),
    }
}

/// Preset used by the top-five-tours alias route.
pub fn top_tours_alias(params: &mut QueryParams) {
    params.insert("limit".into(), Value::from("5"));
    params.insert("sort".into(), Value::from("-ratingsAverage,price"));
    params.insert(
        "field".into(),
        Value::from("name,price,ratingsAverage,summary,difficulty"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn build(raw: &str) -> FindQuery {
        QueryFeatures::new(parse_query_string(raw))
            .filter()
            .sort()
            .fields()
            .pagination()
            .build()
    }

    #[test]
    fn parses_bracket_keys_into_nested_objects() {
        let params = parse_query_string("price[gte]=500&price[lt]=1500&difficulty=easy");
        assert_eq!(params["price"]["gte"], "500");
        assert_eq!(params["price"]["lt"], "1500");
        assert_eq!(params["difficulty"], "easy");
    }

    #[test]
    fn reserved_keys_never_reach_the_filter() {
        let query = build("page=2&sort=price&limit=10&field=name&duration=5");
        for key in RESERVED_KEYS {
            assert!(!query.filter.contains_key(key), "{key} leaked into filter");
        }
        assert_eq!(query.filter, doc! {"duration": 5_i64});
    }

    #[test]
    fn comparison_keywords_are_rewritten_at_any_depth() {
        let query = build("price[gte]=500&ratingsAverage[lt]=4.5&duration[gt]=3");
        assert_eq!(
            query.filter,
            doc! {
                "price": {"$gte": 500_i64},
                "ratingsAverage": {"$lt": 4.5},
                "duration": {"$gt": 3_i64},
            }
        );

        let nested = rewrite_operators(serde_json::json!({"a": {"b": {"lte": 1}}}));
        assert_eq!(nested, serde_json::json!({"a": {"b": {"$lte": 1}}}));
    }

    #[test]
    fn reference_fields_compare_as_object_ids() {
        let user = ObjectId::parse_str("5c8a1dfa2f8fb814b56fa181").unwrap();
        let tour = ObjectId::parse_str("5c88fa8cf4afda39709c2955").unwrap();
        let query = build(&format!("user={}&tour[ne]={}&name={}", user, tour, user));
        assert_eq!(
            query.filter,
            doc! {
                "user": user,
                "tour": {"ne": tour},
                "name": user.to_hex(),
            }
        );

        assert_eq!(build("user=jonas").filter, doc! {"user": "jonas"});
    }

    #[test]
    fn non_operator_keys_pass_through_unchanged() {
        let value = serde_json::json!({"gteq": 1, "name": "gte", "ltd": {"x": 2}});
        assert_eq!(rewrite_operators(value.clone()), value);
    }

    #[test]
    fn default_pagination_is_first_page_of_one_hundred() {
        let query = build("");
        assert_eq!(query.limit, 100);
        assert_eq!(query.skip, 0);
        assert_eq!(query.sort, doc! {"createdAt": -1});
        assert_eq!(query.projection, doc! {"__v": 0});
        assert!(query.filter.is_empty());
    }

    #[test]
    fn page_and_limit_combine_into_skip() {
        let query = build("page=3&limit=20");
        assert_eq!(query.limit, 20);
        assert_eq!(query.skip, 40);
    }

    #[test]
    fn malformed_or_negative_pages_degrade() {
        let query = build("page=abc&limit=xyz");
        assert_eq!((query.skip, query.limit), (0, 100));

        let query = build("page=-2&limit=10");
        assert_eq!((query.skip, query.limit), (0, 10));
    }

    #[test]
    fn sort_accepts_descending_prefix() {
        let query = build("sort=-price,name");
        assert_eq!(query.sort, doc! {"price": -1, "name": 1});
        let keys: Vec<&String> = query.sort.keys().collect();
        assert_eq!(keys, vec!["price", "name"]);
    }

    #[test]
    fn fields_select_and_exclude() {
        assert_eq!(
            build("field=name,price").projection,
            doc! {"name": 1, "price": 1}
        );
        assert_eq!(build("field=-summary").projection, doc! {"summary": 0});
    }

    #[test]
    fn top_tours_alias_overrides_controls() {
        let mut params = parse_query_string("limit=50&sort=name");
        top_tours_alias(&mut params);
        let query = QueryFeatures::new(params)
            .filter()
            .sort()
            .fields()
            .pagination()
            .build();

        assert_eq!(query.limit, 5);
        assert_eq!(query.sort, doc! {"ratingsAverage": -1, "price": 1});
        assert_eq!(
            query.projection,
            doc! {"name": 1, "price": 1, "ratingsAverage": 1, "summary": 1, "difficulty": 1}
        );
    }

    #[test]
    fn values_are_coerced() {
        assert_eq!(coerce("12"), Bson::Int64(12));
        assert_eq!(coerce("4.7"), Bson::Double(4.7));
        assert_eq!(coerce("true"), Bson::Boolean(true));
        assert_eq!(coerce("easy"), Bson::String("easy".into()));
        assert_eq!(coerce("NaN"), Bson::String("NaN".into()));
    }
}

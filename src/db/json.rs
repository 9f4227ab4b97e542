use bson::{Bson, Document};
use serde_json::{Map, Value};

use crate::db::store::Model;
use crate::error::AppError;

/// Converts a stored document into the JSON shape returned to clients.
pub fn to_json(doc: Document) -> Value {
    bson_to_json(Bson::Document(doc))
}

pub fn to_json_all(docs: Vec<Document>) -> Vec<Value> {
    docs.into_iter().map(to_json).collect()
}

/// Renders an `M` document with its virtual fields.
pub fn render<M: Model>(mut doc: Document) -> Value {
    M::add_virtuals(&mut doc);
    to_json(doc)
}

pub fn render_all<M: Model>(docs: Vec<Document>) -> Vec<Value> {
    docs.into_iter().map(render::<M>).collect()
}

pub fn model_to_json<M: Model>(model: &M) -> Result<Value, AppError> {
    Ok(render::<M>(bson::to_document(model)?))
}

fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(dt) => match dt.try_to_rfc3339_string() {
            Ok(s) => Value::String(s),
            Err(_) => Value::from(dt.timestamp_millis()),
        },
        Bson::Document(doc) => Value::Object(
            doc.into_iter()
                .map(|(key, value)| (key, bson_to_json(value)))
                .collect::<Map<_, _>>(),
        ),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

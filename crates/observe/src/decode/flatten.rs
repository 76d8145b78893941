//! Nested JSON → flat dotted-key attribute map.

use common::FlatAttributes;
use serde_json::map::Entry;
use serde_json::{Map, Value};
use tracing::debug;

/// Separator placed between ancestor keys.
pub const SEPARATOR: char = '.';

/// Flatten a JSON object into a map of dotted key paths to scalar values.
///
/// Object keys are joined with [`SEPARATOR`]; array elements use their index
/// as the path segment (`tags.0`, `tags.1`). Empty objects and arrays hold no
/// scalar and therefore produce no key. Flattening an already-flat map returns
/// it unchanged.
///
/// A literal dotted key can collide with a nested path (`{"a.b":1,"a":{"b":2}}`).
/// The first leaf reached in key order wins and the later one is dropped, so
/// the leaf count is only preserved for records without such collisions.
pub fn flatten(tree: &Map<String, Value>) -> FlatAttributes {
    let mut out = FlatAttributes::new();
    for (key, value) in tree {
        flatten_into(value, key.clone(), &mut out);
    }
    out
}

fn flatten_into(value: &Value, path: String, out: &mut FlatAttributes) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, join(&path, key), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, join(&path, &index.to_string()), out);
            }
        }
        scalar => match out.entry(path) {
            Entry::Vacant(slot) => {
                slot.insert(scalar.clone());
            }
            Entry::Occupied(slot) => {
                debug!(key = %slot.key(), "dropping attribute whose flattened key collides");
            }
        },
    }
}

fn join(prefix: &str, segment: &str) -> String {
    let mut path = String::with_capacity(prefix.len() + 1 + segment.len());
    path.push_str(prefix);
    path.push(SEPARATOR);
    path.push_str(segment);
    path
}

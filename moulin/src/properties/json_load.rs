//! Replays a JSON dump into a properties tree.

use serde_json::Value;
use tracing::warn;

use super::Properties;

/// Feeds values from a previously dumped JSON object back into config
/// accessors. Children absent from the dump are skipped; `list_children`
/// exposes the stored ids for lookahead (node reconstruction).
pub struct JsonLoadProperties {
    root: Value,
    path: Vec<String>,
}

impl JsonLoadProperties {
    pub fn new(root: Value) -> Self {
        JsonLoadProperties {
            root,
            path: Vec::new(),
        }
    }

    fn current(&self) -> Option<&Value> {
        let mut value = &self.root;
        for key in &self.path {
            value = value.as_object()?.get(key)?;
        }
        Some(value)
    }

    fn get(&self, id: &str) -> Option<&Value> {
        self.current()?.as_object()?.get(id)
    }
}

impl Properties for JsonLoadProperties {
    fn begin_child(&mut self, id: &str, _label: &str) -> bool {
        if self.get(id).map(|v| v.is_object()).unwrap_or(false) {
            self.path.push(id.to_string());
            true
        } else {
            false
        }
    }

    fn end_child(&mut self) {
        self.path.pop().expect("end_child without begin_child");
    }

    fn list_children(&self) -> Vec<String> {
        self.current()
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter(|(_, v)| v.is_object())
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn config_bool(&mut self, id: &str, value: &mut bool, _desc: &str) -> bool {
        match self.get(id).and_then(Value::as_bool) {
            Some(stored) if stored != *value => {
                *value = stored;
                true
            }
            _ => false,
        }
    }

    fn config_u32(&mut self, id: &str, value: &mut u32, _desc: &str) -> bool {
        match self.get(id).and_then(Value::as_u64) {
            Some(stored) if stored as u32 != *value => {
                *value = stored as u32;
                true
            }
            _ => false,
        }
    }

    fn config_u64(&mut self, id: &str, value: &mut u64, _desc: &str) -> bool {
        match self.get(id).and_then(Value::as_u64) {
            Some(stored) if stored != *value => {
                *value = stored;
                true
            }
            _ => false,
        }
    }

    fn config_f32(&mut self, id: &str, value: &mut f32, _desc: &str) -> bool {
        match self.get(id).and_then(Value::as_f64) {
            Some(stored) if (stored as f32 - *value).abs() > f32::EPSILON => {
                *value = stored as f32;
                true
            }
            _ => false,
        }
    }

    fn config_text(&mut self, id: &str, value: &mut String, _desc: &str) -> bool {
        match self.get(id).and_then(Value::as_str) {
            Some(stored) if stored != value => {
                *value = stored.to_string();
                true
            }
            _ => false,
        }
    }

    fn config_options(
        &mut self,
        id: &str,
        value: &mut usize,
        options: &[&str],
        _desc: &str,
    ) -> bool {
        let Some(stored) = self.get(id).and_then(Value::as_str) else {
            return false;
        };
        match options.iter().position(|&o| o == stored) {
            Some(index) if index != *value => {
                *value = index;
                true
            }
            Some(_) => false,
            None => {
                warn!(id, stored, "stored option is not available, keeping current");
                false
            }
        }
    }

    fn serialize_json(&mut self, id: &str, value: &mut Value) -> bool {
        match self.get(id) {
            Some(stored) => {
                *value = stored.clone();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::JsonDumpProperties;
    use serde_json::json;

    #[test]
    fn dump_then_load_round_trip() {
        let mut dump = JsonDumpProperties::new();
        let mut flag = true;
        let mut count = 3u32;
        let mut name = "a".to_string();
        assert!(dump.begin_child("child", ""));
        dump.config_bool("flag", &mut flag, "");
        dump.config_u32("count", &mut count, "");
        dump.config_text("name", &mut name, "");
        dump.end_child();
        let value = dump.into_value();
        assert_eq!(
            value,
            json!({"child": {"flag": true, "count": 3, "name": "a"}})
        );

        let mut load = JsonLoadProperties::new(value);
        let mut flag2 = false;
        let mut count2 = 0u32;
        let mut name2 = String::new();
        assert!(load.begin_child("child", ""));
        assert!(load.config_bool("flag", &mut flag2, ""));
        assert!(load.config_u32("count", &mut count2, ""));
        assert!(load.config_text("name", &mut name2, ""));
        load.end_child();
        assert!(flag2);
        assert_eq!(count2, 3);
        assert_eq!(name2, "a");
    }

    #[test]
    fn lookahead_lists_object_children() {
        let load = JsonLoadProperties::new(json!({"a": {}, "b": {}, "n": 1}));
        let mut children = load.list_children();
        children.sort();
        assert_eq!(children, ["a", "b"]);
    }
}

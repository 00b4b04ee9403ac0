//! Dumps a properties tree into a JSON value.

use serde_json::{Map, Value};

use super::Properties;

/// Records every config value into a JSON object tree. Status output is
/// dropped; option selections are stored by name so dumps survive reordered
/// option lists.
pub struct JsonDumpProperties {
    /// Stack of open objects; the id the object will be inserted under is
    /// kept alongside.
    stack: Vec<(Option<String>, Map<String, Value>)>,
}

impl JsonDumpProperties {
    pub fn new() -> Self {
        JsonDumpProperties {
            stack: vec![(None, Map::new())],
        }
    }

    pub fn into_value(mut self) -> Value {
        assert_eq!(self.stack.len(), 1, "unbalanced begin_child/end_child");
        Value::Object(self.stack.pop().unwrap().1)
    }

    fn insert(&mut self, id: &str, value: Value) {
        self.stack
            .last_mut()
            .unwrap()
            .1
            .insert(id.to_string(), value);
    }
}

impl Default for JsonDumpProperties {
    fn default() -> Self {
        Self::new()
    }
}

impl Properties for JsonDumpProperties {
    fn begin_child(&mut self, id: &str, _label: &str) -> bool {
        self.stack.push((Some(id.to_string()), Map::new()));
        true
    }

    fn end_child(&mut self) {
        let (id, map) = self.stack.pop().expect("end_child without begin_child");
        let id = id.expect("cannot close the root object");
        self.stack
            .last_mut()
            .unwrap()
            .1
            .insert(id, Value::Object(map));
    }

    fn config_bool(&mut self, id: &str, value: &mut bool, _desc: &str) -> bool {
        self.insert(id, Value::Bool(*value));
        false
    }

    fn config_u32(&mut self, id: &str, value: &mut u32, _desc: &str) -> bool {
        self.insert(id, (*value).into());
        false
    }

    fn config_u64(&mut self, id: &str, value: &mut u64, _desc: &str) -> bool {
        self.insert(id, (*value).into());
        false
    }

    fn config_f32(&mut self, id: &str, value: &mut f32, _desc: &str) -> bool {
        self.insert(id, (*value as f64).into());
        false
    }

    fn config_text(&mut self, id: &str, value: &mut String, _desc: &str) -> bool {
        self.insert(id, Value::String(value.clone()));
        false
    }

    fn config_options(
        &mut self,
        id: &str,
        value: &mut usize,
        options: &[&str],
        _desc: &str,
    ) -> bool {
        if let Some(selected) = options.get(*value) {
            self.insert(id, Value::String((*selected).to_string()));
        }
        false
    }

    fn serialize_json(&mut self, id: &str, value: &mut Value) -> bool {
        self.insert(id, value.clone());
        false
    }
}

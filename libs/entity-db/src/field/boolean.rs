use super::Field;
use crate::value::{truthy, Value};

impl Field {
    pub(super) fn convert_bool(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            v => Value::Bool(truthy(v)),
        }
    }

    pub(super) fn unconvert_bool(&self, value: &Value) -> Value {
        self.convert_bool(value)
    }
}

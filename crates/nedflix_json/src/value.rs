//! JSON 值定义与类型化访问

/// JSON 值
///
/// 每个节点独占其子节点，释放根节点即递归释放整棵树。
/// 对象保留键的原始顺序，键可重复，查找时取第一个匹配。
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsonValue>),
    Object(Vec<(String, JsonValue)>),
}

/// 值类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonValue {
    pub fn kind(&self) -> JsonKind {
        match self {
            JsonValue::Null => JsonKind::Null,
            JsonValue::Bool(_) => JsonKind::Bool,
            JsonValue::Number(_) => JsonKind::Number,
            JsonValue::String(_) => JsonKind::String,
            JsonValue::Array(_) => JsonKind::Array,
            JsonValue::Object(_) => JsonKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsonValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[JsonValue]> {
        match self {
            JsonValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(String, JsonValue)]> {
        match self {
            JsonValue::Object(members) => Some(members),
            _ => None,
        }
    }

    /// 按键查找（第一个匹配）；非对象返回 `None`
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

// ============================================================================
// 类型化访问
//
// 类型不匹配与键缺失同样处理：返回 None 或默认值，从不报错。
// ============================================================================

/// 取字符串字段
pub fn get_string<'a>(obj: &'a JsonValue, key: &str) -> Option<&'a str> {
    obj.get(key)?.as_str()
}

/// 取整数字段（向零截断，超出范围时饱和）
pub fn get_int(obj: &JsonValue, key: &str, default: i64) -> i64 {
    obj.get(key)
        .and_then(JsonValue::as_f64)
        .map(|n| n as i64)
        .unwrap_or(default)
}

/// 取浮点字段
pub fn get_number(obj: &JsonValue, key: &str) -> Option<f64> {
    obj.get(key)?.as_f64()
}

/// 取布尔字段
pub fn get_bool(obj: &JsonValue, key: &str, default: bool) -> bool {
    obj.get(key)
        .and_then(JsonValue::as_bool)
        .unwrap_or(default)
}

/// 取数组字段
pub fn get_array<'a>(obj: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    obj.get(key).filter(|v| v.kind() == JsonKind::Array)
}

/// 取对象字段
pub fn get_object<'a>(obj: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    obj.get(key).filter(|v| v.kind() == JsonKind::Object)
}

/// 数组长度，非数组为 0
pub fn array_length(arr: &JsonValue) -> usize {
    arr.as_array().map_or(0, <[JsonValue]>::len)
}

/// 按下标取数组元素，越界（含负数）返回 `None`
pub fn array_get(arr: &JsonValue, index: i64) -> Option<&JsonValue> {
    let index = usize::try_from(index).ok()?;
    arr.as_array()?.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JsonValue {
        JsonValue::Object(vec![
            ("name".into(), JsonValue::String("clip".into())),
            ("count".into(), JsonValue::Number(3.9)),
            ("neg".into(), JsonValue::Number(-3.9)),
            ("huge".into(), JsonValue::Number(1e300)),
            ("flag".into(), JsonValue::Bool(true)),
            ("list".into(), JsonValue::Array(vec![JsonValue::Null])),
            ("nested".into(), JsonValue::Object(vec![])),
        ])
    }

    #[test]
    fn test_typed_getters() {
        let obj = sample();
        assert_eq!(get_string(&obj, "name"), Some("clip"));
        assert_eq!(get_int(&obj, "count", 0), 3);
        assert_eq!(get_int(&obj, "neg", 0), -3);
        assert_eq!(get_int(&obj, "huge", 0), i64::MAX);
        assert!(get_bool(&obj, "flag", false));
        assert_eq!(array_length(get_array(&obj, "list").unwrap()), 1);
        assert!(get_object(&obj, "nested").is_some());
    }

    #[test]
    fn test_type_mismatch_is_missing() {
        let obj = sample();
        assert_eq!(get_string(&obj, "count"), None);
        assert_eq!(get_int(&obj, "name", 7), 7);
        assert!(!get_bool(&obj, "name", false));
        assert!(get_array(&obj, "nested").is_none());
        assert!(get_object(&obj, "list").is_none());
        assert_eq!(get_string(&obj, "absent"), None);
    }

    #[test]
    fn test_getters_on_non_object() {
        let arr = JsonValue::Array(vec![JsonValue::Bool(true)]);
        assert_eq!(get_string(&arr, "name"), None);
        assert_eq!(get_int(&JsonValue::Null, "x", 5), 5);
        assert!(get_bool(&JsonValue::Number(1.0), "x", true));
    }

    #[test]
    fn test_array_bounds() {
        let empty = JsonValue::Array(vec![]);
        assert_eq!(array_length(&empty), 0);
        assert!(array_get(&empty, 0).is_none());
        assert!(array_get(&empty, -1).is_none());

        let arr = JsonValue::Array(vec![JsonValue::Number(1.0), JsonValue::Number(2.0)]);
        assert_eq!(array_get(&arr, 1), Some(&JsonValue::Number(2.0)));
        assert!(array_get(&arr, -1).is_none());
        assert!(array_get(&arr, 2).is_none());

        assert_eq!(array_length(&JsonValue::String("abc".into())), 0);
        assert!(array_get(&JsonValue::Null, 0).is_none());
    }
}

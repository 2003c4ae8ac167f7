use std::collections::HashMap;
use std::ops::Index;
use std::str::FromStr;
use std::time::Duration;

/// Job configuration, a flat string key/value map with typed accessors.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Properties {
    properties: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Properties {
            properties: HashMap::new(),
        }
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
    }

    pub fn set_string(&mut self, key: String, value: String) {
        self.properties.insert(key, value);
    }

    pub fn get_string(&self, key: &str) -> anyhow::Result<String> {
        match self.properties.get(key) {
            Some(v) => Ok(v.clone()),
            None => Err(anyhow!("`{}` field not found", key)),
        }
    }

    pub fn set_u32(&mut self, key: &str, value: u32) {
        self.set_string(key.to_string(), value.to_string());
    }

    pub fn get_u32(&self, key: &str) -> anyhow::Result<u32> {
        self.get_parsed(key)
    }

    pub fn set_u64(&mut self, key: &str, value: u64) {
        self.set_string(key.to_string(), value.to_string());
    }

    pub fn get_u64(&self, key: &str) -> anyhow::Result<u64> {
        self.get_parsed(key)
    }

    pub fn set_duration(&mut self, key: &str, interval: Duration) {
        self.set_u64(key, interval.as_millis() as u64);
    }

    pub fn get_duration(&self, key: &str) -> anyhow::Result<Duration> {
        let value = self.get_u64(key)?;
        Ok(Duration::from_millis(value))
    }

    /// Read `key`, or `default` when the key is absent. A present but
    /// malformed value is still an error.
    pub fn get_u32_or(&self, key: &str, default: u32) -> anyhow::Result<u32> {
        if self.contains_key(key) {
            self.get_u32(key)
        } else {
            Ok(default)
        }
    }

    pub fn get_duration_or(&self, key: &str, default: Duration) -> anyhow::Result<Duration> {
        if self.contains_key(key) {
            self.get_duration(key)
        } else {
            Ok(default)
        }
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    fn get_parsed<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.properties.get(key) {
            Some(v) => T::from_str(v).map_err(|e| anyhow!("`{}` parse error: {}", key, e)),
            None => Err(anyhow!("`{}` field not found", key)),
        }
    }

    pub fn to_sub_properties(&self, prefix_key: &str) -> Properties {
        let mut properties = Properties::new();

        let pre_key = format!("{}.", prefix_key);
        for (key, value) in self.as_map() {
            if key.starts_with(pre_key.as_str()) {
                let key = key.index(pre_key.len()..);
                properties.set_string(key.to_owned(), value.to_owned());
            }
        }

        properties
    }

    pub fn to_lines_string(&self) -> String {
        let mut lines: Vec<String> = self
            .properties
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

impl From<HashMap<String, String>> for Properties {
    fn from(properties: HashMap<String, String>) -> Self {
        Properties { properties }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::api::properties::Properties;

    #[test]
    pub fn typed_getters_test() {
        let mut properties = Properties::new();
        properties.set_u32("a", 3);
        properties.set_str("b", "x");
        properties.set_duration("c", Duration::from_secs(2));

        assert_eq!(properties.get_u32("a").unwrap(), 3);
        assert!(properties.get_u32("b").is_err());
        assert!(properties.get_u32("missing").is_err());
        assert_eq!(properties.get_u32_or("missing", 7).unwrap(), 7);
        assert!(properties.get_u32_or("b", 7).is_err());
        assert_eq!(
            properties.get_duration("c").unwrap(),
            Duration::from_millis(2000)
        );
        assert_eq!(properties.get_string_or("missing", "d"), "d");
    }

    #[test]
    pub fn sub_properties_test() {
        let mut properties = Properties::new();
        properties.set_str("master.worker.a", "1");
        properties.set_str("master.worker.b", "2");
        properties.set_str("master.resource.c", "3");

        let sub_properties = properties.to_sub_properties("master.worker");
        assert_eq!(sub_properties.as_map().len(), 2);
        assert_eq!(sub_properties.get_string("a").unwrap(), "1");
        assert_eq!(sub_properties.to_lines_string(), "a:1\nb:2");
    }
}

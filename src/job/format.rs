use std::{collections::HashMap, path::Path};

use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use strum_macros::Display;

lazy_static! {
    pub static ref DESCRIPTOR_FORMATS: HashMap<&'static str, DescriptorFormat> = {
        let mut map = HashMap::new();
        map.insert("json", DescriptorFormat::Json);
        map.insert("pickle", DescriptorFormat::Pickle);
        map.insert("pkl", DescriptorFormat::Pickle);
        map
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DescriptorFormat {
    Json,
    Pickle,
}

impl DescriptorFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        DESCRIPTOR_FORMATS.get(ext.as_str()).copied()
    }

    pub fn parse<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, String> {
        match self {
            DescriptorFormat::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            DescriptorFormat::Pickle => {
                serde_pickle::from_slice(bytes, serde_pickle::DeOptions::new())
                    .map_err(|e| e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn formats_by_extension() {
        let cases = [
            ("job_0.json", Some(DescriptorFormat::Json)),
            ("job_0.JSON", Some(DescriptorFormat::Json)),
            ("job_0.pickle", Some(DescriptorFormat::Pickle)),
            ("job_0.pkl", Some(DescriptorFormat::Pickle)),
            ("job_0.yaml", None),
            ("job_0", None),
        ];
        for (name, expected) in cases {
            assert_eq!(DescriptorFormat::from_path(&PathBuf::from(name)), expected, "{}", name);
        }
        assert_eq!(DescriptorFormat::Pickle.to_string(), "pickle");
    }

    #[test]
    fn parses_pickle_dicts() {
        let value = json!({"recording_name": "r1", "nested": {"a": [1, 2]}});
        let bytes = serde_pickle::to_vec(&value, serde_pickle::SerOptions::new()).unwrap();
        let parsed: Value = DescriptorFormat::Pickle.parse(&bytes).unwrap();
        assert_eq!(parsed, value);
        assert!(DescriptorFormat::Json.parse::<Value>(&bytes).is_err());
    }
}

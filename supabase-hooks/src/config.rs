use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderOptions {
    /// Open a realtime channel for each table loaded through `use_table`.
    pub realtime: bool,
    /// Keep `use_query` results keyed by query, so a later hook for the same query starts from the last result.
    pub cache_queries: bool,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            realtime: true,
            cache_queries: true,
        }
    }
}

impl ProviderOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let options = ProviderOptions::from_json(r#"{"realtime": false}"#).unwrap();
        assert_eq!(
            options,
            ProviderOptions {
                realtime: false,
                cache_queries: true,
            }
        );
        assert_eq!(ProviderOptions::from_json("{}").unwrap(), ProviderOptions::default());
    }

    #[test]
    fn test_camel_case_keys() {
        let options = ProviderOptions::from_json(r#"{"cacheQueries": false}"#).unwrap();
        assert!(!options.cache_queries);
        assert!(options.realtime);
    }
}

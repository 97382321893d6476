/// Ordered list of schemas consulted for unqualified routine and type names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    schemas: Vec<String>,
}

impl Default for SearchPath {
    fn default() -> Self {
        Self::new(["public"])
    }
}

impl SearchPath {
    pub fn new<I, S>(schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for schema in schemas {
            let schema = schema.into().trim().trim_matches('"').to_ascii_lowercase();
            // "$user" never names a schema here; there are no per-role schemas.
            if schema.is_empty() || schema == "$user" {
                continue;
            }
            if !normalized.contains(&schema) {
                normalized.push(schema);
            }
        }
        Self {
            schemas: normalized,
        }
    }

    /// Parses a `search_path` setting such as `"$user", public, app`.
    pub fn parse(setting: &str) -> Self {
        Self::new(setting.split(','))
    }

    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// Schema that receives newly created unqualified objects.
    pub fn creation_schema(&self) -> Option<&str> {
        self.schemas.first().map(String::as_str)
    }
}

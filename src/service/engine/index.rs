// Index registry.
//
// Indexes are metadata: the engine records the key specification and the
// options supplied with it, derives names the conventional way, and serves
// the stored definition back as creation metadata.  Options not consumed
// for the definition itself are forwarded into the metadata untouched.

use bson::{doc, Bson, Document};

use crate::util::bson_ext::string_of;

#[derive(Debug, Clone)]
pub struct IndexModel {
    pub name: String,
    pub keys: Document,
    pub options: Document,
}

impl IndexModel {
    pub fn new(keys: Document, options: Option<&Document>) -> Self {
        let options = options.cloned().unwrap_or_default();
        let name = string_of(&options, "name")
            .map(str::to_string)
            .unwrap_or_else(|| derive_name(&keys));
        Self {
            name,
            keys,
            options,
        }
    }

    /// Creation metadata, including the forwarded options.
    pub fn metadata(&self) -> Document {
        let mut meta = doc! {
            "name": self.name.as_str(),
            "key": self.keys.clone(),
            "v": 2_i32,
        };
        for (key, value) in self.options.iter() {
            let key: &str = key.as_ref();
            if key == "name" {
                continue;
            }
            meta.insert(key, value.clone());
        }
        meta
    }

    /// Does a drop-by-specification request refer to this index?
    pub fn matches_spec(&self, spec: &Document) -> bool {
        self.keys == *spec
    }
}

fn derive_name(keys: &Document) -> String {
    let mut parts = Vec::with_capacity(keys.len());
    for (field, direction) in keys.iter() {
        let field: &str = field.as_ref();
        let suffix = match direction {
            Bson::Int32(v) => v.to_string(),
            Bson::Int64(v) => v.to_string(),
            Bson::Double(v) => (*v as i64).to_string(),
            Bson::String(kind) => kind.clone(),
            _ => "1".to_string(),
        };
        parts.push(format!("{}_{}", field, suffix));
    }
    parts.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_conventional_names() {
        let index = IndexModel::new(doc! { "database": 1_i32 }, None);
        assert_eq!(index.name, "database_1");

        let index = IndexModel::new(doc! { "key": 1_i32, "created": -1_i32 }, None);
        assert_eq!(index.name, "key_1_created_-1");

        let index = IndexModel::new(doc! { "body": "text" }, None);
        assert_eq!(index.name, "body_text");
    }

    #[test]
    fn explicit_name_wins() {
        let index = IndexModel::new(doc! { "key": 1_i32 }, Some(&doc! { "name": "custom" }));
        assert_eq!(index.name, "custom");
    }

    #[test]
    fn metadata_forwards_options() {
        let index = IndexModel::new(
            doc! { "key": 1_i32 },
            Some(&doc! { "unique": true, "expireAfterSeconds": 3600_i32 }),
        );
        let meta = index.metadata();
        assert_eq!(meta.get("name"), Some(&Bson::String("key_1".to_string())));
        assert_eq!(meta.get("unique"), Some(&Bson::Boolean(true)));
        assert_eq!(meta.get("expireAfterSeconds"), Some(&Bson::Int32(3600)));
        assert!(meta.contains_key("key"));
    }

    #[test]
    fn spec_matching() {
        let index = IndexModel::new(doc! { "key": 1_i32 }, None);
        assert!(index.matches_spec(&doc! { "key": 1_i32 }));
        assert!(!index.matches_spec(&doc! { "key": -1_i32 }));
    }
}

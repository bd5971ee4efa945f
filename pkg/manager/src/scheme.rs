use serde_json::Value;
use std::collections::HashMap;

use pkg_types::meta::{KindSpec, Record};

type DecodeFn = fn(&Value) -> anyhow::Result<()>;

/// Process-wide mapping from kind tag to record type, used to decode
/// and sanity-check store payloads. Watching a kind that was never
/// registered is a fatal configuration error at startup.
#[derive(Clone, Default)]
pub struct SchemeRegistry {
    kinds: HashMap<&'static str, (KindSpec, DecodeFn)>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: Record>(&mut self) {
        self.kinds
            .insert(R::KIND, (R::kind_spec(), decode_as::<R>));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kind_spec(&self, kind: &str) -> Option<KindSpec> {
        self.kinds.get(kind).map(|(spec, _)| *spec)
    }

    /// Check that a store payload decodes as its registered type.
    pub fn decode(&self, kind: &str, value: &Value) -> anyhow::Result<()> {
        match self.kinds.get(kind) {
            Some((_, decode)) => decode(value),
            None => Err(anyhow::anyhow!("kind {} is not registered in the scheme", kind)),
        }
    }
}

fn decode_as<R: Record>(value: &Value) -> anyhow::Result<()> {
    serde_json::from_value::<R>(value.clone())
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("payload does not decode as {}: {}", R::KIND, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::namespace::Namespace;

    #[test]
    fn test_register_and_decode() {
        let mut scheme = SchemeRegistry::new();
        scheme.register::<Namespace>();
        assert!(scheme.contains("Namespace"));
        assert!(!scheme.contains("Tenant"));

        let value = serde_json::to_value(Namespace {
            metadata: ObjectMeta::new("dev"),
        })
        .unwrap();
        scheme.decode("Namespace", &value).unwrap();
        assert!(scheme.decode("Tenant", &value).is_err());
    }
}

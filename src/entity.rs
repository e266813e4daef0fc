//! Entity contract shared by every repository

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::IndexSpec;
use crate::mapper::FieldMapper;

/// A record stored in a collection, identified by a single string id.
///
/// Ids are client chosen and compared case-sensitively. Beyond `id()` the
/// shape of an entity is whatever serde makes of it.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique id within the collection
    fn id(&self) -> &str;

    /// Runtime type discriminator used by the identity rule.
    ///
    /// Two entities with the same id but a different kind are distinct
    /// records. Enum entities can return one kind per variant.
    fn kind(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Collection used when a repository is built without a `CollectionSpec`
    fn collection_name() -> String
    where
        Self: Sized,
    {
        short_type_name::<Self>().to_string()
    }

    /// Secondary indexes provisioned on every store the repository touches
    fn indexes() -> Vec<IndexSpec>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Hook to adjust a store's field mapping before first use
    fn configure_mapper(_mapper: &mut FieldMapper)
    where
        Self: Sized,
    {
    }
}

/// Type name without module path or generic arguments
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Invoice {
        id: String,
    }

    impl Entity for Invoice {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn test_default_collection_name() {
        assert_eq!(Invoice::collection_name(), "Invoice");
        assert!(Invoice::indexes().is_empty());
    }

    #[test]
    fn test_short_type_name_strips_generics() {
        assert_eq!(short_type_name::<Vec<Invoice>>(), "Vec");
        assert_eq!(short_type_name::<Invoice>(), "Invoice");
    }

    #[test]
    fn test_default_kind_is_type_name() {
        let a = Invoice { id: "1".into() };
        assert!(a.kind().ends_with("Invoice"));
    }
}

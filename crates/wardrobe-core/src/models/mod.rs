//! Entity types persisted by the wardrobe stores.

mod compatibility;
mod item;
mod outfit;

pub use compatibility::{CompatibilityResult, PairKey};
pub use item::Item;
pub use outfit::Outfit;

use serde::{de::DeserializeOwned, Serialize};

/// A record that lives in a named, ordered collection and carries an `id`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name, used as the table key by relational backends.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

impl Record for Item {
    const COLLECTION: &'static str = "items";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Outfit {
    const COLLECTION: &'static str = "outfits";

    fn id(&self) -> &str {
        &self.id
    }
}

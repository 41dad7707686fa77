pub mod error;
pub mod photos;

pub use self::error::CatalogError;
pub use self::photos::{CatalogService, PhotoCatalog, PhotoRecord};

pub mod credentials;
pub mod error;
pub mod events;
pub mod media;
pub mod outfit;
pub mod receipts;
pub mod status;
pub mod wardrobe;

pub use error::TryOnError;

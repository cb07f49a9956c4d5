pub mod secret;

pub use secret::shared_secret_matches;

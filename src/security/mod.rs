// Secret handling

mod secret;

pub use secret::{generate_app_secret, SecretProtector};

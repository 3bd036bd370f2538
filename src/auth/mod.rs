// Authentication module
// Token persistence, session state and the hand-off to the login flow

mod login;
mod session;
mod token_store;
mod types;

pub use login::{parse_url, LoginFlow, LoginLauncher, OAuthSettings};
pub use session::AuthSession;
pub use token_store::TokenStore;
pub use types::{LoginOutcome, SessionEvent, Token};

pub(crate) use session::bearer_header;

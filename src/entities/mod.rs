pub mod prelude;

pub mod email_verification_tokens;
pub mod login_audit;
pub mod oauth_accounts;
pub mod password_reset_tokens;
pub mod posts;
pub mod users;

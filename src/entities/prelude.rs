pub use super::email_verification_tokens::Entity as EmailVerificationTokens;
pub use super::login_audit::Entity as LoginAudit;
pub use super::oauth_accounts::Entity as OauthAccounts;
pub use super::password_reset_tokens::Entity as PasswordResetTokens;
pub use super::posts::Entity as Posts;
pub use super::users::Entity as Users;

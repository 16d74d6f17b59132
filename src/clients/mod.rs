pub mod captcha;
pub mod mail;
pub mod oauth;

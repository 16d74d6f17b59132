pub mod auth_service;
pub mod auth_service_impl;
pub mod mail_templates;
pub mod newsletter;
pub mod post_service;
pub mod post_service_impl;
pub mod rate_limit;
pub mod slug;
pub mod uploads;

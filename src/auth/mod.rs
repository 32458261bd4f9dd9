//! Authentication: cookies, errors, request extractors, and the auth flows.

pub mod cookie;
pub mod errors;
pub mod extractors;
pub mod flows;

pub use cookie::{
    ACCESS_COOKIE_NAME, ADMIN_ACCESS_COOKIE_NAME, ADMIN_REFRESH_COOKIE_NAME, REFRESH_COOKIE_NAME,
    SESSION_ID_HEADER,
};
pub use errors::AuthError;
pub use extractors::{HasAuthState, MaybeUser, RequireAdmin, RequireUser};

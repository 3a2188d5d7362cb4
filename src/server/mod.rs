//! Request helpers for the site server: locale negotiation and redirects.

pub mod locale;
pub mod redirects;

pub use locale::{DEFAULT_LOCALE, PREFERRED_LOCALE_COOKIE_NAME, VALID_LOCALES, get_locale};
pub use redirects::{RedirectMap, build_redirects_map, parse_redirect_lines};

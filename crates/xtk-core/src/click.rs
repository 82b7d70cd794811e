//! Click-id detection over the current page's query parameters.

use crate::params;

/// Returns the first present, non-empty click-id value, scanning
/// `click_id_params` in configured order. Values are not validated; the ad
/// platforms own their formats.
pub fn detect_click_id<'a>(
    url_params: &'a [(String, String)],
    click_id_params: &[String],
) -> Option<&'a str> {
    click_id_params.iter().find_map(|name| {
        params::lookup(url_params, name).filter(|value| !value.is_empty())
    })
}

use std::fs;
use std::path::PathBuf;

use docsite::config::ContentConfig;
use docsite::server::{
    DEFAULT_LOCALE, PREFERRED_LOCALE_COOKIE_NAME, VALID_LOCALES, build_redirects_map, get_locale,
};

#[test]
fn every_valid_locale_round_trips_through_the_cookie() {
    assert_eq!(PREFERRED_LOCALE_COOKIE_NAME, "preferredlocale");
    for locale in VALID_LOCALES {
        let lowered = locale.to_lowercase();
        assert_eq!(get_locale(Some(&lowered), None, DEFAULT_LOCALE), *locale);
    }
}

#[test]
fn browser_header_is_used_when_cookie_is_unknown() {
    let header = "fr-CH, fr;q=0.9, en;q=0.8, de;q=0.7, *;q=0.5";
    assert_eq!(get_locale(Some("klingon"), Some(header), DEFAULT_LOCALE), "fr");
    assert_eq!(get_locale(None, Some("es-MX,es;q=0.9"), DEFAULT_LOCALE), "es");
}

#[test]
fn missing_translated_root_still_loads_main_content() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("content");
    fs::create_dir_all(root.join("files/en-us")).unwrap();
    fs::create_dir_all(root.join("en-us")).unwrap();
    // The plain layout wins over `files/` when both exist.
    fs::write(root.join("en-us/_redirects.txt"), "/en-US/A\t/en-US/B\n").unwrap();
    fs::write(root.join("files/en-us/_redirects.txt"), "/en-US/A\t/en-US/C\n").unwrap();

    let map = build_redirects_map(&ContentConfig {
        content_root: Some(root),
        content_translated_root: None,
        project_root: Some(PathBuf::from("/nonexistent")),
    });
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("/en-us/a"), Some("/en-US/B"));
}

mod support;

use docsite::{app_dirs, config};
use support::env::ConfigHomeGuard;

#[test]
fn config_and_offline_dirs_live_under_config_home() {
    let temp = tempfile::tempdir().unwrap();
    let _env = ConfigHomeGuard::set(temp.path().to_path_buf());

    let root = app_dirs::app_root_dir().unwrap();
    assert_eq!(root, temp.path().join(app_dirs::APP_DIR_NAME));
    assert!(app_dirs::offline_dir().unwrap().starts_with(&root));
    assert_eq!(
        config::config_path().unwrap(),
        root.join(config::CONFIG_FILE_NAME)
    );
}

#[test]
fn saved_config_is_loaded_back() {
    let temp = tempfile::tempdir().unwrap();
    let _env = ConfigHomeGuard::set(temp.path().to_path_buf());

    assert_eq!(config::load_or_default().unwrap(), config::AppConfig::default());
    let mut cfg = config::AppConfig::default();
    cfg.offline.updates_base_url = "http://127.0.0.1:8000".into();
    cfg.site.default_locale = "ja".into();
    config::save(&cfg).unwrap();
    assert_eq!(config::load_or_default().unwrap(), cfg);
}
